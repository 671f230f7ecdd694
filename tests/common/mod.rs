use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use tempfile::TempDir;

/// Stands in for ssh: runs the requested integrit mode against the files in
/// $FAKE_REMOTE_DIR, with $FAKE_REMOTE_STATE as the host's filesystem state.
const FAKE_SSH: &str = r#"#!/bin/sh
while [ "$1" != "--" ]; do shift; done
shift
cmd="$2"
cd "$FAKE_REMOTE_DIR" || exit 255
echo "$cmd" >> .commands
set -- $cmd
site="${4%.integrit.conf}"
[ -f ./integrit ] || { echo "integrit: command not found" >&2; exit 127; }
[ -f "$4" ] || { echo "integrit: cannot open $4" >&2; exit 1; }
cp "$FAKE_REMOTE_STATE" "$site.integrit.current.cdb" || exit 1
case "$2" in
  -u) echo "integrit: database updated"; exit 0 ;;
  -c)
    echo "integrit: checking"
    if cmp -s "$site.integrit.known.cdb" "$FAKE_REMOTE_STATE"; then
      echo "integrit: no changes detected"
    else
      echo "changed: /etc/passwd"
      echo "new: /tmp/dropper"
    fi
    exit 0 ;;
esac
exit 2
"#;

/// Stands in for scp: `user@host:path` maps into $FAKE_REMOTE_DIR.
const FAKE_SCP: &str = r#"#!/bin/sh
while [ "$1" != "--" ]; do shift; done
shift
map() {
  case "$1" in
    *@*:*) echo "$FAKE_REMOTE_DIR/${1#*:}" ;;
    *) echo "$1" ;;
  esac
}
cp "$(map "$1")" "$(map "$2")"
"#;

pub struct Workspace {
    pub temp: TempDir,
}

// Each integration test file is compiled as its own crate and uses a
// different subset of these helpers.
#[allow(dead_code)]
impl Workspace {
    pub fn new() -> Self {
        Self::with_settings("")
    }

    /// A workspace whose settings file points ssh/scp at the stubs, followed
    /// by `extra` settings.
    pub fn with_settings(extra: &str) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path();
        for dir in ["config-files", "databases", "bin", "remote", "stubs"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("bin/integrit"), "#!/bin/sh\n").unwrap();

        for (name, script) in [("ssh", FAKE_SSH), ("scp", FAKE_SCP)] {
            let path = root.join("stubs").join(name);
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fs::write(
            root.join("integrit-remote.toml"),
            format!(
                "[ssh]\nssh_program = \"{}\"\nscp_program = \"{}\"\n{extra}",
                root.join("stubs/ssh").display(),
                root.join("stubs/scp").display(),
            ),
        )
        .unwrap();

        let workspace = Workspace { temp };
        workspace.set_remote_state("state-a");
        workspace
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn add_site(&self, site: &str) {
        fs::write(
            self.root().join(format!("config-files/{site}.integrit.conf")),
            format!("# Host: deploy@{site}.example.com\nroot=/var/www\n"),
        )
        .unwrap();
    }

    pub fn set_remote_state(&self, state: &str) {
        fs::write(self.root().join("state"), state).unwrap();
    }

    pub fn known_db_path(&self, site: &str) -> PathBuf {
        self.root()
            .join(format!("databases/{site}.integrit.known.cdb"))
    }

    pub fn baseline(&self, site: &str) -> Option<String> {
        fs::read_to_string(self.known_db_path(site)).ok()
    }

    /// Commands the stub ssh was asked to run.
    pub fn remote_commands(&self) -> Vec<String> {
        fs::read_to_string(self.root().join("remote/.commands"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("integrit-remote");
        cmd.env("FAKE_REMOTE_DIR", self.root().join("remote"))
            .env("FAKE_REMOTE_STATE", self.root().join("state"))
            .env_remove("RUST_LOG")
            .arg("-C")
            .arg(self.root());
        cmd
    }
}

/// A minimal SMTP sink. Each accepted message's DATA section is sent on the
/// returned channel.
#[allow(dead_code)]
pub fn smtp_sink() -> (u16, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            writer.write_all(b"220 localhost ESMTP sink\r\n").unwrap();

            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let verb = line.trim_end().to_ascii_uppercase();
                if verb.starts_with("DATA") {
                    writer.write_all(b"354 go ahead\r\n").unwrap();
                    let mut data = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).unwrap_or(0) == 0 {
                            return;
                        }
                        if line == ".\r\n" {
                            break;
                        }
                        data.push_str(&line);
                    }
                    let _ = tx.send(data);
                    writer.write_all(b"250 queued\r\n").unwrap();
                } else if verb.starts_with("QUIT") {
                    writer.write_all(b"221 bye\r\n").unwrap();
                    break;
                } else {
                    writer.write_all(b"250 ok\r\n").unwrap();
                }
            }
        }
    });

    (port, rx)
}

/// A localhost port with nothing listening on it.
#[allow(dead_code)]
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
