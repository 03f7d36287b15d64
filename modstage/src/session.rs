//! Device side staged install sessions.
//!
//! A [Transaction] walks the package manager through one staged install:
//!
//! ```text
//! Idle -> ParentSessionCreated -> ChildSessionsCreated -> FilesWritten
//!      -> ChildrenAttached -> Committed -> Rebooting -> Verifying -> Verified
//! ```
//!
//! The parent session and the attach step only exist when more than one
//! package is installed together. Any failed step moves the transaction to
//! [SessionState::Failed] and nothing after it is attempted.

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use crate::artifact::ModuleArtifact;
use crate::device::{Device, ShellOutput};
use crate::errors::SetupError;
use crate::utils::{device_join, file_name_lossy, file_size, file_stem_lossy};

/// Where module files are pushed before being written to a session
pub const MODULE_PUSH_REMOTE_PATH: &'static str = "/data/local/tmp/";

const PARENT_SESSION_CREATION_CMD: &'static str = "pm install-create --multi-package";
const CHILD_SESSION_CREATION_CMD: &'static str = "pm install-create";
const APEX_OPTION: &'static str = "--apex";
const STAGED_INSTALL_OPTION: &'static str = "--staged";
const ENABLE_ROLLBACK_INSTALL_OPTION: &'static str = "--enable-rollback";
const STAGED_READY_TIMEOUT_OPTION: &'static str = "--staged-ready-timeout";
const SESSION_ID_FILTER: &'static str = "| egrep -o -e '[0-9]+'";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ParentSessionCreated,
    ChildSessionsCreated,
    FilesWritten,
    ChildrenAttached,
    Committed,
    Rebooting,
    Verifying,
    Verified,
    Failed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Verified, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Idle, ParentSessionCreated)
            | (Idle, ChildSessionsCreated)
            | (ParentSessionCreated, ChildSessionsCreated)
            | (ChildSessionsCreated, FilesWritten)
            | (FilesWritten, ChildrenAttached)
            | (FilesWritten, Committed)
            | (ChildrenAttached, Committed)
            | (Committed, Rebooting)
            | (Rebooting, Verifying)
            | (Rebooting, Verified)
            | (Verifying, Verified) => true,
            _ => false,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// `--multi-package` session holding the children
    Parent,
    Child { package: String, apex: bool },
}

/// Options shared by every session of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub enable_rollback: bool,
    pub staged_ready_timeout: Option<Duration>,
}

impl SessionOptions {
    /// The `pm install-create` command for a session of the given kind, piped
    /// through `egrep` so only the session id is printed
    pub fn create_cmd(&self, kind: &SessionKind) -> String {
        let mut cmd = String::from(match kind {
            SessionKind::Parent => PARENT_SESSION_CREATION_CMD,
            SessionKind::Child { .. } => CHILD_SESSION_CREATION_CMD,
        });
        if let SessionKind::Child { apex: true, .. } = kind {
            cmd.push(' ');
            cmd.push_str(APEX_OPTION);
        }
        cmd.push(' ');
        cmd.push_str(STAGED_INSTALL_OPTION);
        if self.enable_rollback {
            cmd.push(' ');
            cmd.push_str(ENABLE_ROLLBACK_INSTALL_OPTION);
        }
        if let Some(timeout) = self.staged_ready_timeout.filter(|it| !it.is_zero()) {
            cmd.push_str(&format!(
                " {} {}",
                STAGED_READY_TIMEOUT_OPTION,
                timeout.as_millis()
            ));
        }
        cmd.push(' ');
        cmd.push_str(SESSION_ID_FILTER);
        cmd
    }
}

/// A session created on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: u64,
    pub kind: SessionKind,
    pub enable_rollback: bool,
    pub staged_ready_timeout: Option<Duration>,
}

impl Session {
    pub fn package(&self) -> Option<&str> {
        match &self.kind {
            SessionKind::Parent => None,
            SessionKind::Child { package, .. } => Some(package),
        }
    }
}

/// Parses the session id printed by a filtered `pm install-create`
pub fn parse_session_id(stdout: &str) -> Option<u64> {
    stdout
        .split_whitespace()
        .next()
        .and_then(|it| it.parse().ok())
}

/// Remote path a local module file is pushed to
pub fn remote_path_for(file: &Path) -> String {
    device_join(MODULE_PUSH_REMOTE_PATH, &file_name_lossy(file))
}

pub fn write_cmd(size: u64, session: u64, name: &str, remote: &str) -> String {
    format!("pm install-write -S {} {} {} {}", size, session, name, remote)
}

pub fn add_session_cmd(parent: u64, child: u64) -> String {
    format!("pm install-add-session {} {}", parent, child)
}

pub fn commit_cmd(session: u64) -> String {
    format!("pm install-commit {}", session)
}

pub fn rollback_cmd(package: &str) -> String {
    format!("pm rollback-app {}", package)
}

/// Push every file of every module to [MODULE_PUSH_REMOTE_PATH], stopping at
/// the first failure
pub fn push_modules<D>(device: &D, modules: &[ModuleArtifact]) -> crate::Result<()>
where
    D: Device + ?Sized,
{
    for file in modules.iter().flat_map(|it| it.files.iter()) {
        let remote = remote_path_for(file);
        if !device.push_file(file, &remote)? {
            return Err(SetupError::PushFailed {
                local: file.to_path_buf(),
                remote,
            }
            .into());
        }
        log::debug!("{} pushed successfully to {}.", file_name_lossy(file), remote);
    }
    Ok(())
}

/// One staged install on one device
pub struct Transaction<'a, D: Device + ?Sized> {
    device: &'a D,
    options: SessionOptions,
    state: SessionState,
    parent: Option<Session>,
    children: Vec<Session>,
}

impl<'a, D: Device + ?Sized> Transaction<'a, D> {
    pub fn new(device: &'a D, options: SessionOptions) -> Self {
        Self {
            device,
            options,
            state: SessionState::Idle,
            parent: None,
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn parent(&self) -> Option<&Session> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[Session] {
        &self.children
    }

    /// Move to the next state, illegal moves are bugs in the caller
    pub fn advance(&mut self, next: SessionState) -> crate::Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(crate::Error::Generic(format!(
                "invalid session transition {} -> {}",
                self.state, next
            )));
        }
        log::trace!("session state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Marks the transaction as failed if `res` is an error
    pub fn track<T>(&mut self, res: crate::Result<T>) -> crate::Result<T> {
        if res.is_err() && self.state != SessionState::Failed {
            self.state = SessionState::Failed;
        }
        res
    }

    fn create_session(&self, kind: SessionKind) -> crate::Result<Session> {
        let cmd = self.options.create_cmd(&kind);
        let res = self.device.shell(&cmd)?;
        let id = if res.ok() {
            parse_session_id(&res.stdout)
        } else {
            None
        };

        if let Some(id) = id {
            return Ok(Session {
                id,
                kind,
                enable_rollback: self.options.enable_rollback,
                staged_ready_timeout: self.options.staged_ready_timeout,
            });
        }
        if res.ok() {
            return Err(SetupError::InvalidSessionId { output: res.stdout }.into());
        }
        let err = match kind {
            SessionKind::Parent => SetupError::CreateParentSession {
                stderr: res.stderr,
                stdout: res.stdout,
            },
            SessionKind::Child { package, .. } => SetupError::CreateChildSession {
                package,
                stderr: res.stderr,
                stdout: res.stdout,
            },
        };
        Err(err.into())
    }

    pub fn create_parent(&mut self) -> crate::Result<u64> {
        self.advance(SessionState::ParentSessionCreated)?;
        let res = self.create_session(SessionKind::Parent);
        let session = self.track(res)?;
        log::debug!("Parent session {} created successfully.", session.id);
        let id = session.id;
        self.parent = Some(session);
        Ok(id)
    }

    /// Create one child session per module, in order
    pub fn create_children(&mut self, modules: &[ModuleArtifact]) -> crate::Result<()> {
        self.advance(SessionState::ChildSessionsCreated)?;
        for module in modules {
            let kind = SessionKind::Child {
                package: module.package_name.clone(),
                apex: module.is_apex(),
            };
            let res = self.create_session(kind);
            let session = self.track(res)?;
            log::debug!(
                "Child session {} created successfully for {}.",
                session.id,
                module.package_name
            );
            self.children.push(session);
        }
        Ok(())
    }

    /// Write each module's files into its child session. `modules` must be
    /// the same slice the children were created from.
    pub fn write_files(&mut self, modules: &[ModuleArtifact]) -> crate::Result<()> {
        self.advance(SessionState::FilesWritten)?;
        if modules.len() != self.children.len() {
            let res = Err(crate::Error::Generic(format!(
                "{} modules for {} child sessions",
                modules.len(),
                self.children.len()
            )));
            return self.track(res);
        }
        for idx in 0..modules.len() {
            let session = self.children[idx].id;
            let res = self.write_module(session, &modules[idx]);
            self.track(res)?;
        }
        Ok(())
    }

    fn write_module(&self, session: u64, module: &ModuleArtifact) -> crate::Result<()> {
        for (idx, file) in module.files.iter().enumerate() {
            // Names have to be unique within a session
            let name = if idx == 0 {
                module.package_name.clone()
            } else {
                file_stem_lossy(file).into_owned()
            };
            let size = file_size(file)?;
            let cmd = write_cmd(size, session, &name, &remote_path_for(file));
            let res = self.device.shell(&cmd)?;
            if !res.ok() {
                return Err(SetupError::WriteSession {
                    file: file_name_lossy(file).into_owned(),
                    session,
                    stderr: res.stderr,
                    stdout: res.stdout,
                }
                .into());
            }
            log::debug!(
                "Successfully wrote {} to session {}.",
                file_name_lossy(file),
                session
            );
        }
        Ok(())
    }

    pub fn attach_children(&mut self) -> crate::Result<()> {
        let parent = match self.parent.as_ref().map(|it| it.id) {
            Some(v) => v,
            None => {
                return self.track(Err(crate::Error::new_generic(
                    "no parent session to attach children to",
                )))
            }
        };
        self.advance(SessionState::ChildrenAttached)?;
        for idx in 0..self.children.len() {
            let child = self.children[idx].id;
            let res = self.attach_child(parent, child);
            self.track(res)?;
        }
        Ok(())
    }

    fn attach_child(&self, parent: u64, child: u64) -> crate::Result<()> {
        let res: ShellOutput = self.device.shell(&add_session_cmd(parent, child))?;
        if !res.ok() {
            return Err(SetupError::AddChildSession {
                child,
                parent,
                stderr: res.stderr,
                stdout: res.stdout,
            }
            .into());
        }
        Ok(())
    }

    /// Commit the parent session, or the only child when there is no parent
    pub fn commit(&mut self) -> crate::Result<u64> {
        let target = match (&self.parent, self.children.as_slice()) {
            (Some(p), _) if self.state == SessionState::ChildrenAttached => Some(p.id),
            (None, [only]) => Some(only.id),
            _ => None,
        };
        let session = match target {
            Some(v) => v,
            None => {
                let msg = format!("nothing to commit in state {}", self.state);
                return self.track(Err(crate::Error::new_generic(&msg)));
            }
        };
        self.advance(SessionState::Committed)?;

        let res = self.device.shell(&commit_cmd(session));
        let res = self.track(res)?;
        if !res.ok() {
            let err = SetupError::Commit {
                session,
                serial: self.device.serial(),
                stderr: res.stderr,
                stdout: res.stdout,
            };
            return self.track(Err(err.into()));
        }
        log::debug!("Train is staged successfully. Stdout: {}.", res.stdout.trim());
        Ok(session)
    }

    /// Run the session steps for `modules`: parent (if needed), children,
    /// writes, attach (if needed) and commit.
    pub fn stage(&mut self, modules: &[ModuleArtifact]) -> crate::Result<u64> {
        let multi = modules.len() > 1;
        if multi {
            self.create_parent()?;
        }
        self.create_children(modules)?;
        self.write_files(modules)?;
        if multi {
            self.attach_children()?;
        }
        self.commit()
    }
}
