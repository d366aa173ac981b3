// Blocking SSH/SFTP session wrapper for the shell-path backend.
//
// ssh2 is a synchronous library; every caller runs these operations
// inside `tokio::task::spawn_blocking`. One session is opened per
// provisioning operation and dropped when it completes.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use secrecy::ExposeSecret;
use ssh2::Session;
use tracing::{debug, trace};

use crate::config::{SshAuth, SshSettings};
use crate::error::EngineError;

/// An authenticated SSH session to the proxy host.
pub struct SshSession {
    session: Session,
    host: String,
}

impl SshSession {
    /// Connect and authenticate.
    pub fn connect(settings: &SshSettings) -> Result<Self, EngineError> {
        let address = settings.address();
        let addr = address
            .to_socket_addrs()
            .map_err(|e| EngineError::discovery("ssh host", format!("{address}: {e}")))?
            .next()
            .ok_or_else(|| {
                EngineError::discovery("ssh host", format!("{address}: no resolved address"))
            })?;

        debug!(%address, "connecting to proxy host");
        let tcp = TcpStream::connect_timeout(&addr, settings.connect_timeout)
            .map_err(|e| EngineError::discovery("ssh host", format!("{address}: {e}")))?;
        tcp.set_read_timeout(Some(settings.connect_timeout)).ok();
        tcp.set_write_timeout(Some(settings.connect_timeout)).ok();

        let mut session = Session::new()
            .map_err(|e| EngineError::Internal(format!("ssh session init: {e}")))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| EngineError::discovery("ssh host", format!("handshake: {e}")))?;

        match &settings.auth {
            SshAuth::KeyFile(path) => {
                session
                    .userauth_pubkey_file(&settings.username, None, path, None)
                    .map_err(|e| EngineError::Authentication {
                        message: format!("ssh key auth: {e}"),
                    })?;
            }
            SshAuth::Password(password) => {
                session
                    .userauth_password(&settings.username, password.expose_secret())
                    .map_err(|e| EngineError::Authentication {
                        message: format!("ssh password auth: {e}"),
                    })?;
            }
        }
        if !session.authenticated() {
            return Err(EngineError::Authentication {
                message: format!("ssh authentication refused for {}", settings.username),
            });
        }

        debug!(%address, "ssh session established");
        Ok(Self {
            session,
            host: settings.host.clone(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run a command, returning (stdout, exit status).
    pub fn exec(&self, command: &str) -> Result<(String, i32), EngineError> {
        trace!(command, "ssh exec");
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| EngineError::Internal(format!("ssh channel: {e}")))?;
        channel
            .exec(command)
            .map_err(|e| EngineError::Internal(format!("ssh exec {command:?}: {e}")))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| EngineError::Internal(format!("ssh stdout read: {e}")))?;
        channel
            .wait_close()
            .map_err(|e| EngineError::Internal(format!("ssh channel close: {e}")))?;
        let status = channel
            .exit_status()
            .map_err(|e| EngineError::Internal(format!("ssh exit status: {e}")))?;

        trace!(command, status, "ssh exec finished");
        Ok((stdout, status))
    }

    /// `test -f` probe for a remote path.
    pub fn file_exists(&self, path: &str) -> Result<bool, EngineError> {
        let (out, _) = self.exec(&format!("test -f {path} && echo found"))?;
        Ok(out.trim() == "found")
    }

    /// Read a remote file to a string via SFTP.
    pub fn read_file(&self, path: &str) -> Result<String, EngineError> {
        let sftp = self.sftp()?;
        let mut file = sftp
            .open(Path::new(path))
            .map_err(|e| EngineError::Internal(format!("sftp open {path}: {e}")))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| EngineError::Internal(format!("sftp read {path}: {e}")))?;
        Ok(contents)
    }

    /// Write a string to a remote file via SFTP, replacing its contents.
    pub fn write_file(&self, path: &str, contents: &str) -> Result<(), EngineError> {
        let sftp = self.sftp()?;
        let mut file = sftp
            .create(Path::new(path))
            .map_err(|e| EngineError::Internal(format!("sftp create {path}: {e}")))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| EngineError::Internal(format!("sftp write {path}: {e}")))?;
        Ok(())
    }

    /// Download a remote file to a local path (binary-safe).
    pub fn download(&self, remote: &str, local: &Path) -> Result<(), EngineError> {
        let sftp = self.sftp()?;
        let mut file = sftp
            .open(Path::new(remote))
            .map_err(|e| EngineError::Internal(format!("sftp open {remote}: {e}")))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| EngineError::Internal(format!("sftp read {remote}: {e}")))?;
        std::fs::write(local, bytes)
            .map_err(|e| EngineError::Internal(format!("local write {}: {e}", local.display())))?;
        Ok(())
    }

    /// Upload a local file to a remote path (binary-safe).
    pub fn upload(&self, local: &Path, remote: &str) -> Result<(), EngineError> {
        let bytes = std::fs::read(local)
            .map_err(|e| EngineError::Internal(format!("local read {}: {e}", local.display())))?;
        let sftp = self.sftp()?;
        let mut file = sftp
            .create(Path::new(remote))
            .map_err(|e| EngineError::Internal(format!("sftp create {remote}: {e}")))?;
        file.write_all(&bytes)
            .map_err(|e| EngineError::Internal(format!("sftp write {remote}: {e}")))?;
        Ok(())
    }

    fn sftp(&self) -> Result<ssh2::Sftp, EngineError> {
        self.session
            .sftp()
            .map_err(|e| EngineError::Internal(format!("sftp subsystem: {e}")))
    }
}
