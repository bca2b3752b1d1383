// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! macOS keychain manipulation via the `security` tool.

use {
    crate::{certificate::LocalCertificate, AutoProvisionError},
    log::{debug, info, warn},
    std::path::{Path, PathBuf},
};

const REDACTED: &str = "*****";

/// A `security` invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecurityCommand {
    args: Vec<String>,

    /// Index of an argument that must not be logged.
    secret: Option<usize>,
}

impl SecurityCommand {
    fn new(args: &[&str]) -> Self {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
            secret: None,
        }
    }

    fn with_secret(args: &[&str], secret: usize) -> Self {
        Self {
            secret: Some(secret),
            ..Self::new(args)
        }
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Arguments with secrets redacted.
    pub fn printable(&self) -> String {
        self.args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                if Some(i) == self.secret {
                    REDACTED
                } else {
                    arg.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A keychain to import signing certificates into.
#[derive(Clone, Debug)]
pub struct Keychain {
    path: PathBuf,
    password: String,
    security_exe: PathBuf,
    dry_run: bool,
}

impl Keychain {
    pub fn new(path: impl AsRef<Path>, password: impl ToString) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            password: password.to_string(),
            security_exe: PathBuf::from("security"),
            dry_run: false,
        }
    }

    /// Log commands instead of running them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_security_exe(mut self, path: impl AsRef<Path>) -> Self {
        self.security_exe = path.as_ref().to_path_buf();
        self
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    /// Whether the keychain file exists.
    ///
    /// Keychains created by newer macOS versions carry a `-db` suffix.
    pub fn exists(&self) -> bool {
        let mut db = self.path.clone().into_os_string();
        db.push("-db");

        self.path.exists() || PathBuf::from(db).exists()
    }

    fn run(&self, command: &SecurityCommand) -> Result<String, AutoProvisionError> {
        let printable = format!("{} {}", self.security_exe.display(), command.printable());

        if self.dry_run {
            info!("dry run; not running: {}", printable);
            return Ok(String::new());
        }

        debug!("running {}", printable);

        let output = duct::cmd(&self.security_exe, command.arguments())
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if output.status.success() {
            for line in stdout.lines() {
                debug!("security> {}", line);
            }

            Ok(stdout)
        } else {
            for line in stdout.lines() {
                warn!("security> {}", line);
            }

            Err(AutoProvisionError::Keychain(command.printable()))
        }
    }

    pub fn create_command(&self) -> SecurityCommand {
        SecurityCommand::with_secret(
            &["-v", "create-keychain", "-p", self.password.as_str(), self.path_str().as_str()],
            3,
        )
    }

    pub fn unlock_command(&self) -> SecurityCommand {
        SecurityCommand::with_secret(
            &["-v", "unlock-keychain", "-p", self.password.as_str(), self.path_str().as_str()],
            3,
        )
    }

    pub fn lock_settings_command(&self) -> SecurityCommand {
        SecurityCommand::new(&[
            "-v",
            "set-keychain-settings",
            "-lut",
            "72000",
            self.path_str().as_str(),
        ])
    }

    pub fn default_keychain_command(&self) -> SecurityCommand {
        SecurityCommand::new(&["-v", "default-keychain", "-s", self.path_str().as_str()])
    }

    /// Command setting the user search list to `existing` plus this keychain.
    pub fn search_list_command(&self, existing: &[String]) -> SecurityCommand {
        let path = self.path_str();

        let mut args = vec!["-v", "list-keychains", "-d", "user", "-s"];
        args.extend(existing.iter().map(|s| s.as_str()).filter(|s| *s != path));
        args.push(&path);

        SecurityCommand::new(&args)
    }

    pub fn import_command(&self, p12_path: &Path, passphrase: &str) -> SecurityCommand {
        SecurityCommand::with_secret(
            &[
                "import",
                p12_path.display().to_string().as_str(),
                "-k",
                self.path_str().as_str(),
                "-P",
                passphrase,
                "-A",
            ],
            5,
        )
    }

    pub fn partition_list_command(&self) -> SecurityCommand {
        SecurityCommand::with_secret(
            &[
                "set-key-partition-list",
                "-S",
                "apple-tool:,apple:",
                "-k",
                self.password.as_str(),
                self.path_str().as_str(),
            ],
            4,
        )
    }

    fn list_keychains(&self) -> Result<Vec<String>, AutoProvisionError> {
        let output = self.run(&SecurityCommand::new(&["list-keychains", "-d", "user"]))?;

        Ok(output
            .lines()
            .map(|l| l.trim().trim_matches('"').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Create the keychain if needed and make it the unlocked default keychain.
    pub fn prepare(&self) -> Result<(), AutoProvisionError> {
        if self.exists() {
            info!("using existing keychain {}", self.path.display());
        } else {
            info!("creating keychain {}", self.path.display());
            self.run(&self.create_command())?;
        }

        let existing = self.list_keychains()?;
        self.run(&self.search_list_command(&existing))?;
        self.run(&self.default_keychain_command())?;
        self.run(&self.unlock_command())?;
        self.run(&self.lock_settings_command())?;

        Ok(())
    }

    /// Import a signing certificate and its private key.
    pub fn import_certificate(&self, cert: &LocalCertificate) -> Result<(), AutoProvisionError> {
        info!(
            "importing {} into {}",
            cert.info.common_name,
            self.path.display()
        );

        if self.dry_run {
            info!("dry run; not importing certificate");
            return Ok(());
        }

        let p12_path =
            std::env::temp_dir().join(format!("rprovision-{}.p12", cert.info.serial));
        std::fs::write(&p12_path, &cert.pkcs12)?;

        let res = self
            .run(&self.import_command(&p12_path, &cert.passphrase))
            .and_then(|_| self.run(&self.partition_list_command()));

        std::fs::remove_file(&p12_path)?;

        res.map(|_| ())
    }
}
