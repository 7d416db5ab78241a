//! Built-in device dialects.
//!
//! A dialect describes how to talk to one device family over an interactive
//! shell: what its prompt looks like, how to disable paging, how errors are
//! reported and how to recognise it from a probe command during autodetection.
//! Names follow the netmiko `device_type` convention.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::ConnectError;

/// Static description of a device family.
#[derive(Debug, PartialEq, Eq)]
pub struct Dialect {
    /// Canonical `device_type` name.
    pub name: &'static str,
    /// Alternative names accepted in device sets.
    pub aliases: &'static [&'static str],
    pub vendor: &'static str,
    /// Prompt pattern, matched against the trailing partial line.
    pub prompt: &'static str,
    /// Unprivileged prompt. When it matches after login, `enable_command` runs.
    pub user_prompt: Option<&'static str>,
    pub enable_command: Option<&'static str>,
    /// Commands run once after login to disable paging.
    pub paging_commands: &'static [&'static str],
    /// Pager prompt, answered with a space.
    pub pager: Option<&'static str>,
    /// Output line patterns marking a failed command.
    pub errors: &'static [&'static str],
    /// Command whose output identifies this dialect.
    pub probe: &'static str,
    /// Patterns in the probe output that identify this dialect.
    pub signatures: &'static [&'static str],
}

/// Matches password prompts during privilege escalation.
pub const PASSWORD_PROMPT: &str = r"(?i)password:\s*$";

const CISCO_PROMPT: &str = r"^[\w\-\.\(\)/:@]+[>#]\s*$";
const CISCO_USER_PROMPT: &str = r"^[\w\-\.]+>\s*$";
const CISCO_PAGER: &str = r"\s*(<--- More --->|--More--)\s*";
const CISCO_ERRORS: &[&str] = &[
    r"^% ?Invalid",
    r"^% Incomplete",
    r"^% Ambiguous",
    r"^% Unknown",
    r"^Command authorization failed.*",
    r"^Command rejected:.*",
];
const VRP_PROMPT: &str = r"^(HRP_M|HRP_S|RBM_P|RBM_S)?[<\[][^<>\[\]]+[>\]]\s*$";
const VRP_PAGER: &str = r"\s*---- More ----\s*";

/// Used by the autodetection session before the dialect is known.
pub static GENERIC: Dialect = Dialect {
    name: "generic",
    aliases: &[],
    vendor: "Unknown",
    prompt: r"[>#\$%\]]\s*$",
    user_prompt: None,
    enable_command: None,
    paging_commands: &[],
    pager: Some(r"(?i)(-+\s*more\s*-+|<--- More --->|--More--)"),
    errors: &[],
    probe: "",
    signatures: &[],
};

/// All supported dialects, in autodetection priority order.
pub static CATALOG: &[Dialect] = &[
    Dialect {
        name: "cisco_xr",
        aliases: &["iosxr"],
        vendor: "Cisco",
        prompt: CISCO_PROMPT,
        user_prompt: None,
        enable_command: None,
        paging_commands: &["terminal length 0", "terminal width 512"],
        pager: Some(CISCO_PAGER),
        errors: CISCO_ERRORS,
        probe: "show version",
        signatures: &[r"Cisco IOS XR Software"],
    },
    Dialect {
        name: "cisco_xe",
        aliases: &["iosxe"],
        vendor: "Cisco",
        prompt: CISCO_PROMPT,
        user_prompt: Some(CISCO_USER_PROMPT),
        enable_command: Some("enable"),
        paging_commands: &["terminal length 0", "terminal width 511"],
        pager: Some(CISCO_PAGER),
        errors: CISCO_ERRORS,
        probe: "show version",
        signatures: &[r"Cisco IOS[ -]XE Software", r"IOS-XE"],
    },
    Dialect {
        name: "cisco_nxos",
        aliases: &["nxos"],
        vendor: "Cisco",
        prompt: CISCO_PROMPT,
        user_prompt: None,
        enable_command: None,
        paging_commands: &["terminal length 0", "terminal width 511"],
        pager: Some(CISCO_PAGER),
        errors: CISCO_ERRORS,
        probe: "show version",
        signatures: &[r"Cisco Nexus Operating System", r"NX-OS"],
    },
    Dialect {
        name: "cisco_asa",
        aliases: &["asa"],
        vendor: "Cisco",
        prompt: CISCO_PROMPT,
        user_prompt: Some(CISCO_USER_PROMPT),
        enable_command: Some("enable"),
        paging_commands: &["terminal pager 0"],
        pager: Some(CISCO_PAGER),
        errors: &[r"^ERROR:", r"^% ?Invalid", r"^% Incomplete"],
        probe: "show version",
        signatures: &[r"Cisco Adaptive Security Appliance"],
    },
    Dialect {
        name: "cisco_ios",
        aliases: &["cisco", "ios"],
        vendor: "Cisco",
        prompt: CISCO_PROMPT,
        user_prompt: Some(CISCO_USER_PROMPT),
        enable_command: Some("enable"),
        paging_commands: &["terminal length 0", "terminal width 511"],
        pager: Some(CISCO_PAGER),
        errors: CISCO_ERRORS,
        probe: "show version",
        signatures: &[
            r"Cisco IOS Software",
            r"Cisco Internetwork Operating System Software",
        ],
    },
    Dialect {
        name: "arista_eos",
        aliases: &["arista"],
        vendor: "Arista",
        prompt: CISCO_PROMPT,
        user_prompt: Some(CISCO_USER_PROMPT),
        enable_command: Some("enable"),
        paging_commands: &["terminal length 0", "terminal width 32767"],
        pager: Some(CISCO_PAGER),
        errors: CISCO_ERRORS,
        probe: "show version",
        signatures: &[r"(?i)Arista"],
    },
    Dialect {
        name: "juniper_junos",
        aliases: &["juniper", "junos"],
        vendor: "Juniper",
        prompt: r"^[\w\-\.]+@[\w\-\.]+[>#%]\s*$",
        user_prompt: None,
        enable_command: None,
        paging_commands: &["set cli screen-length 0", "set cli screen-width 511"],
        pager: Some(r"---\(more( \d+%)?\)---"),
        errors: &[r"^error:", r"^syntax error", r"^unknown command"],
        probe: "show version",
        signatures: &[r"JUNOS", r"Junos:"],
    },
    Dialect {
        name: "hillstone",
        aliases: &["stoneos"],
        vendor: "Hillstone",
        prompt: r"^[\w\-\.]+(\(\S+\))?[>#]\s*$",
        user_prompt: None,
        enable_command: None,
        paging_commands: &["terminal length 0"],
        pager: Some(r"\s*--More--\s*"),
        errors: &[r"^Error:", r"^%\s*Error", r"^\s*\^-+"],
        probe: "show version",
        signatures: &[r"Hillstone", r"StoneOS"],
    },
    Dialect {
        name: "huawei",
        aliases: &["huawei_vrp", "vrp"],
        vendor: "Huawei",
        prompt: VRP_PROMPT,
        user_prompt: None,
        enable_command: None,
        paging_commands: &["screen-length 0 temporary"],
        pager: Some(VRP_PAGER),
        errors: &[r"^Error: .+$", r"^\s*\^$"],
        probe: "display version",
        signatures: &[r"Huawei Versatile Routing Platform", r"VRP \(R\) software"],
    },
    Dialect {
        name: "hp_comware",
        aliases: &["h3c", "comware"],
        vendor: "H3C",
        prompt: VRP_PROMPT,
        user_prompt: None,
        enable_command: None,
        paging_commands: &["screen-length disable"],
        pager: Some(VRP_PAGER),
        errors: &[r"^\s*% (Unrecognized|Incomplete|Too many|Wrong)", r"^\s*\^$"],
        probe: "display version",
        signatures: &[r"H3C Comware", r"(HPE )?Comware Software"],
    },
    Dialect {
        name: "linux",
        aliases: &["linux_ssh"],
        vendor: "Linux",
        prompt: r"[\$#]\s*$",
        user_prompt: None,
        enable_command: None,
        paging_commands: &[],
        pager: None,
        errors: &[r"command not found$"],
        probe: "uname -a",
        signatures: &[r"^Linux "],
    },
];

/// Finds a dialect by canonical name or alias (case-insensitive).
pub fn lookup(name: &str) -> Option<&'static Dialect> {
    let name = name.trim();
    CATALOG.iter().find(|d| {
        d.name.eq_ignore_ascii_case(name) || d.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    })
}

/// Distinct probe commands in catalog order.
pub fn probes() -> Vec<&'static str> {
    let mut probes: Vec<&'static str> = Vec::new();
    for dialect in CATALOG {
        if !probes.contains(&dialect.probe) {
            probes.push(dialect.probe);
        }
    }
    probes
}

/// Signature sets, one per catalog entry. An entry whose signatures fail
/// to compile never matches.
static SIGNATURES: Lazy<Vec<Option<RegexSet>>> = Lazy::new(|| {
    CATALOG
        .iter()
        .map(|dialect| RegexSet::new(dialect.signatures).ok())
        .collect()
});

/// Returns the first dialect probed by `probe` whose signature matches `output`.
pub fn identify(probe: &str, output: &str) -> Option<&'static Dialect> {
    CATALOG
        .iter()
        .zip(SIGNATURES.iter())
        .filter(|(d, _)| d.probe == probe)
        .find(|(_, set)| {
            set.as_ref()
                .is_some_and(|set| output.lines().any(|line| set.is_match(line.trim_end())))
        })
        .map(|(d, _)| d)
}

impl Dialect {

    /// Compiles every pattern of the dialect.
    pub fn compile(&'static self) -> Result<CompiledDialect, ConnectError> {
        let compile = |what: &str, pattern: &str| {
            Regex::new(pattern).map_err(|err| {
                ConnectError::InvalidDialect(format!("{} {what} regex: {err}", self.name))
            })
        };

        Ok(CompiledDialect {
            dialect: self,
            prompt: compile("prompt", self.prompt)?,
            user_prompt: self
                .user_prompt
                .map(|p| compile("user prompt", p))
                .transpose()?,
            pager: self.pager.map(|p| compile("pager", p)).transpose()?,
            password_prompt: compile("password prompt", PASSWORD_PROMPT)?,
            errors: RegexSet::new(self.errors).map_err(|err| {
                ConnectError::InvalidDialect(format!("{} error regex set: {err}", self.name))
            })?,
        })
    }
}

/// A dialect with its patterns compiled, owned by one session.
#[derive(Debug)]
pub struct CompiledDialect {
    pub dialect: &'static Dialect,
    pub prompt: Regex,
    pub user_prompt: Option<Regex>,
    pub pager: Option<Regex>,
    pub password_prompt: Regex,
    pub errors: RegexSet,
}

impl CompiledDialect {
    /// True when a complete output line reports a command failure.
    pub fn is_error_line(&self, line: &str) -> bool {
        self.errors.is_match(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dialect_compiles() {
        for dialect in CATALOG.iter().chain(std::iter::once(&GENERIC)) {
            dialect
                .compile()
                .unwrap_or_else(|err| panic!("{} failed to compile: {err}", dialect.name));
            for sig in dialect.signatures {
                Regex::new(sig).expect("signature regex");
            }
        }
        assert_eq!(SIGNATURES.len(), CATALOG.len());
        assert!(SIGNATURES.iter().all(Option::is_some));
    }

    #[test]
    fn lookup_accepts_aliases_case_insensitively() {
        assert_eq!(lookup("CISCO_IOS").map(|d| d.name), Some("cisco_ios"));
        assert_eq!(lookup("h3c").map(|d| d.name), Some("hp_comware"));
        assert_eq!(lookup(" Juniper ").map(|d| d.name), Some("juniper_junos"));
        assert!(lookup("cisco_wlc").is_none());
    }

    #[test]
    fn names_and_aliases_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for dialect in CATALOG {
            assert!(seen.insert(dialect.name), "duplicate {}", dialect.name);
            for alias in dialect.aliases {
                assert!(seen.insert(alias), "duplicate alias {alias}");
            }
        }
    }

    #[test]
    fn probes_are_distinct_and_ordered() {
        assert_eq!(probes(), vec!["show version", "display version", "uname -a"]);
    }

    #[test]
    fn identify_prefers_more_specific_cisco_families() {
        let xe = "Cisco IOS XE Software, Version 17.03.04a\nCisco IOS Software [Amsterdam]";
        assert_eq!(identify("show version", xe).map(|d| d.name), Some("cisco_xe"));

        let ios = "Cisco IOS Software, C2960 Software (C2960-LANBASEK9-M), Version 15.0(2)SE";
        assert_eq!(identify("show version", ios).map(|d| d.name), Some("cisco_ios"));
    }

    #[test]
    fn identify_vrp_from_display_version() {
        let out = "Huawei Versatile Routing Platform Software\nVRP (R) software, Version 8.180";
        assert_eq!(identify("display version", out).map(|d| d.name), Some("huawei"));
        assert!(identify("show version", out).is_none());
    }

    #[test]
    fn prompts_match_typical_device_prompts() {
        let ios = lookup("cisco_ios").expect("ios").compile().expect("compile");
        assert!(ios.prompt.is_match("core-sw1#"));
        assert!(ios.prompt.is_match("core-sw1(config-if)# "));
        assert!(ios.user_prompt.as_ref().expect("user prompt").is_match("core-sw1>"));
        assert!(!ios.prompt.is_match("Building configuration..."));

        let vrp = lookup("huawei").expect("huawei").compile().expect("compile");
        assert!(vrp.prompt.is_match("<HUAWEI>"));
        assert!(vrp.prompt.is_match("[~HUAWEI-GigabitEthernet0/0/1]"));

        let junos = lookup("junos").expect("junos").compile().expect("compile");
        assert!(junos.prompt.is_match("admin@mx480-re0> "));
    }

    #[test]
    fn error_lines_are_classified() {
        let ios = lookup("cisco_ios").expect("ios").compile().expect("compile");
        assert!(ios.is_error_line("% Invalid input detected at '^' marker."));
        assert!(!ios.is_error_line("GigabitEthernet0/1 is up, line protocol is up"));
    }
}
