use super::*;

use crate::transport::dialect::GENERIC;

/// Strips ANSI escape sequences emitted by device shells.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b[()][A-Za-z0-9]|\x1b[=>]") {
        Ok(re) => re,
        Err(err) => panic!("invalid ANSI_ESCAPE regex: {err}"),
    }
});

/// Carriage returns and backspaces left at line start by pager redraws.
static IGNORE_START_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
        Ok(re) => re,
        Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
    }
});

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// [`DeviceTransport`] over SSH interactive shells.
#[derive(Debug, Clone)]
pub struct SshTransport {
    security: ConnectionSecurityOptions,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(ConnectionSecurityOptions::default())
    }
}

impl SshTransport {
    pub fn new(security: ConnectionSecurityOptions) -> Self {
        Self {
            security,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Bounds TCP connect, authentication and the wait for the first prompt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bounds each command execution.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn security(&self) -> &ConnectionSecurityOptions {
        &self.security
    }

    async fn open(
        &self,
        device: &Device,
        dialect: &'static Dialect,
    ) -> Result<SshSession, ConnectError> {
        let device_addr = device.addr();
        let compiled = dialect.compile()?;

        let opened = tokio::time::timeout(
            self.connect_timeout,
            SshSession::open(device, compiled, self.security.clone(), self.command_timeout),
        )
        .await;

        match opened {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(format!(
                "{device_addr} did not answer within {}s",
                self.connect_timeout.as_secs()
            ))),
        }
    }
}

impl DeviceTransport for SshTransport {
    type Session = SshSession;

    async fn detect(&self, device: &Device) -> Result<String, ConnectError> {
        let mut session = self.open(device, &GENERIC).await?;

        let mut detected = None;
        for probe in dialect::probes() {
            let output = match session.execute(probe).await {
                Ok(output) => output,
                Err(err) if err.is_session_lost() => {
                    session.close().await;
                    return Err(ConnectError::Detection(format!(
                        "session lost while probing '{probe}': {err}"
                    )));
                }
                Err(err) => {
                    debug!("{} probe '{}' failed: {}", device.addr(), probe, err);
                    continue;
                }
            };
            if let Some(found) = dialect::identify(probe, &output) {
                detected = Some(found.name.to_string());
                break;
            }
        }
        session.close().await;

        detected.ok_or_else(|| {
            ConnectError::Detection(format!("no known dialect matched {}", device.addr()))
        })
    }

    async fn connect(&self, device: &Device, device_type: &str) -> Result<SshSession, ConnectError> {
        let dialect = dialect::lookup(device_type)
            .ok_or_else(|| ConnectError::UnsupportedDeviceType(device_type.to_string()))?;
        let mut session = self.open(device, dialect).await?;

        for command in dialect.paging_commands {
            if let Err(err) = session.execute(command).await {
                if err.is_session_lost() {
                    return Err(err);
                }
                warn!("{} '{}' rejected: {}", session.device_addr, command, err);
            }
        }
        Ok(session)
    }
}

/// An interactive shell on one device.
pub struct SshSession {
    client: Client,
    sender: Sender<String>,
    recv: Receiver<String>,
    dialect: CompiledDialect,
    prompt: String,
    command_timeout: Duration,
    device_addr: String,
}

impl SshSession {
    async fn open(
        device: &Device,
        dialect: CompiledDialect,
        security: ConnectionSecurityOptions,
        command_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let device_addr = device.addr();
        let credentials = device.credentials();

        let config = Config {
            preferred: security.preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (device.ip().to_string(), device.port()),
            &credentials.username,
            AuthMethod::with_password(credentials.password.expose()),
            security.server_check.clone(),
            config,
        )
        .await
        .map_err(|err| match err {
            async_ssh2_tokio::Error::PasswordWrong => ConnectError::AuthFailure(device_addr.clone()),
            other => ConnectError::Connect(format!("{device_addr}: {other}")),
        })?;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = receiver_from_user.recv() => {
                        let Some(data) = data else {
                            // Session released: half-close the shell.
                            let _ = channel.eof().await;
                            break;
                        };
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { ref data }) => {
                                let text = String::from_utf8_lossy(data).into_owned();
                                if sender_to_user.send(text).await.is_err() {
                                    debug!("{} Shell output receiver dropped", io_task_device_addr);
                                    break;
                                }
                            }
                            Some(ChannelMsg::ExitStatus { exit_status }) => {
                                debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                                debug!("{} Shell sent EOF", io_task_device_addr);
                                break;
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
            debug!("{} SSH I/O task ended", io_task_device_addr);
        });

        let mut session = Self {
            client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            dialect,
            prompt: String::new(),
            command_timeout,
            device_addr,
        };

        session.read_until_prompt(None).await?;
        debug!("{} initial prompt {:?}", session.device_addr, session.prompt);

        if let Some(secret) = &credentials.secret {
            session.enter_privileged(Some(secret.expose())).await?;
        } else {
            session.enter_privileged(None).await?;
        }
        Ok(session)
    }

    /// Sends the enable command when the shell sits at an unprivileged prompt.
    async fn enter_privileged(&mut self, secret: Option<&str>) -> Result<(), ConnectError> {
        let Some(enable) = self.dialect.dialect.enable_command else {
            return Ok(());
        };
        if !self.at_user_prompt() {
            return Ok(());
        }

        debug!("{} entering privileged mode", self.device_addr);
        let reply = format!("{}\n", secret.unwrap_or(""));
        self.send(enable).await?;
        self.read_until_prompt(Some(&reply)).await?;

        if self.at_user_prompt() {
            return Err(ConnectError::AuthFailure(format!(
                "{} rejected privileged mode password",
                self.device_addr
            )));
        }
        Ok(())
    }

    fn at_user_prompt(&self) -> bool {
        self.dialect
            .user_prompt
            .as_ref()
            .is_some_and(|re| re.is_match(self.prompt.trim_end()))
    }

    async fn send(&mut self, command: &str) -> Result<(), ConnectError> {
        // Drop output that arrived after the last prompt.
        while self.recv.try_recv().is_ok() {}
        self.sender
            .send(format!("{command}\n"))
            .await
            .map_err(|_| ConnectError::SessionClosed)
    }

    /// Reads shell output until the dialect prompt shows on the trailing
    /// partial line. Returns the raw output and whether an error line was seen.
    ///
    /// `password_reply` is written whenever a password prompt appears.
    async fn read_until_prompt(
        &mut self,
        password_reply: Option<&str>,
    ) -> Result<(String, bool), ConnectError> {
        let dialect = &self.dialect;
        let recv = &mut self.recv;
        let sender = &self.sender;
        let prompt = &mut self.prompt;

        let mut output = String::new();
        let mut line_buffer = String::new();
        let mut is_error = false;

        let result = tokio::time::timeout(self.command_timeout, async {
            loop {
                let Some(data) = recv.recv().await else {
                    return Err(ConnectError::SessionClosed);
                };
                trace!("{:?}", data);
                line_buffer.push_str(&ANSI_ESCAPE.replace_all(&data, ""));

                while let Some(newline_pos) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline_pos).collect();
                    let line = IGNORE_START_LINE.replace(&line, "");
                    if dialect.is_error_line(line.trim()) {
                        is_error = true;
                    }
                    output.push_str(&line);
                }

                if line_buffer.is_empty() {
                    continue;
                }
                if dialect.prompt.is_match(&line_buffer) {
                    *prompt = std::mem::take(&mut line_buffer);
                    return Ok(());
                }
                if dialect
                    .pager
                    .as_ref()
                    .is_some_and(|pager| pager.is_match(&line_buffer))
                {
                    line_buffer.clear();
                    sender
                        .send(" ".to_string())
                        .await
                        .map_err(|_| ConnectError::SessionClosed)?;
                    continue;
                }
                if let Some(reply) = password_reply
                    && dialect.password_prompt.is_match(&line_buffer)
                {
                    line_buffer.clear();
                    sender
                        .send(reply.to_string())
                        .await
                        .map_err(|_| ConnectError::SessionClosed)?;
                }
            }
        })
        .await;

        match result {
            Ok(Ok(())) => Ok((output, is_error)),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                output.push_str(&line_buffer);
                Err(ConnectError::ExecTimeout(output))
            }
        }
    }
}

/// Removes the echoed command and normalizes line endings.
fn clean_output(command: &str, raw: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "");
    let mut lines = text.lines().peekable();
    if lines
        .peek()
        .is_some_and(|first| first.trim_end().ends_with(command.trim()))
    {
        lines.next();
    }
    let mut cleaned = lines.collect::<Vec<_>>().join("\n");
    let trimmed_len = cleaned.trim_end().len();
    cleaned.truncate(trimmed_len);
    cleaned
}

impl DeviceSession for SshSession {
    async fn execute(&mut self, command: &str) -> Result<String, ConnectError> {
        debug!("{} exec: {}", self.device_addr, command);
        self.send(command).await?;
        let (raw, is_error) = self.read_until_prompt(None).await?;
        let output = clean_output(command, &raw);
        if is_error {
            return Err(ConnectError::Exec(output));
        }
        Ok(output)
    }

    async fn close(self) {
        let Self {
            client,
            sender,
            device_addr,
            ..
        } = self;
        // Dropping the sender makes the I/O task send EOF.
        drop(sender);
        if let Err(err) = client.disconnect().await {
            debug!("{} disconnect failed: {:?}", device_addr, err);
        }
        debug!("{} SSH connection closed", device_addr);
    }
}
