use super::*;
use crate::notify::{AlertMessage, MailConfig};
use crate::registry::{CONFIG_SUFFIX, KNOWN_DB_SUFFIX};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// In-memory stand-in for a host running integrit.
///
/// `observed` is the host's filesystem state; an update run writes it to the
/// current database, a check run compares it with the staged known database.
#[derive(Default)]
struct FakeRemote {
    files: RefCell<HashMap<String, Vec<u8>>>,
    observed: RefCell<Vec<u8>>,
    calls: RefCell<Vec<String>>,
    fail_exec_containing: RefCell<Option<String>>,
    fail_transfer_containing: RefCell<Option<String>>,
}

impl FakeRemote {
    fn with_state(state: &[u8]) -> Self {
        let remote = FakeRemote::default();
        remote.set_state(state);
        remote
    }

    fn set_state(&self, state: &[u8]) {
        *self.observed.borrow_mut() = state.to_vec();
    }

    fn fail_exec(&self, needle: &str) {
        *self.fail_exec_containing.borrow_mut() = Some(needle.to_string());
    }

    fn fail_transfer(&self, needle: &str) {
        *self.fail_transfer_containing.borrow_mut() = Some(needle.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn exec_count(&self, needle: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("exec ") && c.contains(needle))
            .count()
    }

    fn remote_file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(name).cloned()
    }
}

impl RemoteExecutor for FakeRemote {
    fn exec(&self, host: &HostDescriptor, command: &str) -> Result<String, RemoteError> {
        self.calls.borrow_mut().push(format!("exec {command}"));

        if let Some(needle) = self.fail_exec_containing.borrow().as_deref()
            && command.contains(needle)
        {
            return Err(RemoteError::ExecFailed {
                host: host.to_string(),
                status: "exit status: 1".to_string(),
                stderr: "integrit: simulated failure".to_string(),
            });
        }

        let config = command.rsplit(' ').next().unwrap_or_default();
        let site = config.strip_suffix(CONFIG_SUFFIX).unwrap();
        let mut files = self.files.borrow_mut();
        assert!(files.contains_key(REMOTE_BINARY), "binary not uploaded");
        assert!(files.contains_key(config), "config not uploaded");

        let observed = self.observed.borrow().clone();
        files.insert(SiteRegistry::current_db_name(site), observed.clone());

        if command.contains(" -u ") {
            return Ok("integrit: updating database\n".to_string());
        }

        let known = files
            .get(&format!("{site}{KNOWN_DB_SUFFIX}"))
            .expect("known db not staged");
        if *known == observed {
            Ok("integrit: checking\nintegrit: no changes detected\n".to_string())
        } else {
            Ok("integrit: checking\nchanged: /etc/passwd\nnew: /tmp/dropper\n".to_string())
        }
    }

    fn transfer(&self, from: &Endpoint, to: &Endpoint) -> Result<(), RemoteError> {
        let call = format!("transfer {from} -> {to}");
        self.calls.borrow_mut().push(call.clone());

        if let Some(needle) = self.fail_transfer_containing.borrow().as_deref()
            && call.contains(needle)
        {
            return Err(RemoteError::TransferFailed {
                from: from.to_string(),
                to: to.to_string(),
                status: "exit status: 1".to_string(),
                stderr: "scp: simulated failure".to_string(),
            });
        }

        match (from, to) {
            (Endpoint::Local(local), Endpoint::Remote { path, .. }) => {
                let bytes = fs::read(local).unwrap();
                self.files.borrow_mut().insert(path.clone(), bytes);
            }
            (Endpoint::Remote { path, .. }, Endpoint::Local(local)) => {
                let bytes = self.files.borrow().get(path).cloned().ok_or_else(|| {
                    RemoteError::TransferFailed {
                        from: from.to_string(),
                        to: to.to_string(),
                        status: "exit status: 1".to_string(),
                        stderr: format!("scp: {path}: No such file or directory"),
                    }
                })?;
                fs::write(local, bytes).unwrap();
            }
            _ => panic!("unexpected transfer {call}"),
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: RefCell<Vec<AlertMessage>>,
    fail: Cell<bool>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, _mail: &MailConfig, message: &AlertMessage) -> Result<(), NotifyError> {
        if self.fail.get() {
            return Err(NotifyError::Dispatch {
                server: "mail.example.com:25".to_string(),
                source: "connection refused".into(),
            });
        }
        self.sent.borrow_mut().push(message.clone());
        Ok(())
    }
}

struct Fixture {
    temp: TempDir,
    registry: SiteRegistry,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("config-files")).unwrap();
        fs::create_dir_all(temp.path().join("databases")).unwrap();
        fs::create_dir_all(temp.path().join("bin")).unwrap();
        fs::write(temp.path().join("bin/integrit"), b"\x7fELF integrit").unwrap();

        let registry = SiteRegistry::new(
            temp.path().join("config-files"),
            temp.path().join("databases"),
        );

        Fixture { temp, registry }
    }

    fn add_site(&self, site: &str, host: &str) {
        fs::write(
            self.registry.config_path(site),
            format!("# Host: {host}\nroot=/var/www\nknown={site}.integrit.known.cdb\n"),
        )
        .unwrap();
    }

    fn write_baseline(&self, site: &str, bytes: &[u8]) {
        fs::write(self.registry.known_db_path(site), bytes).unwrap();
    }

    fn baseline(&self, site: &str) -> Option<Vec<u8>> {
        fs::read(self.registry.known_db_path(site)).ok()
    }

    fn controller<'a>(
        &self,
        remote: &'a FakeRemote,
        notifier: &'a RecordingNotifier,
    ) -> SiteController<&'a FakeRemote, &'a RecordingNotifier> {
        SiteController::new(
            self.registry.clone(),
            self.temp.path().join("bin/integrit"),
            remote,
            notifier,
        )
    }

    fn database_dir_entries(&self) -> usize {
        fs::read_dir(self.temp.path().join("databases"))
            .unwrap()
            .count()
    }
}

fn mail() -> MailOptions {
    MailOptions {
        server: Some("mail.example.com".to_string()),
        to: Some("ops@example.com".to_string()),
        ..MailOptions::default()
    }
}

fn assert_no_partial_files(dir: &Path) {
    for entry in fs::read_dir(dir).unwrap() {
        let name = entry.unwrap().file_name();
        assert!(
            !name.to_string_lossy().ends_with(".partial"),
            "leftover staging file {name:?}"
        );
    }
}
