//! Certificate authority and key pairs, via Easy-RSA
//!
//! Easy-RSA is driven in batch mode. Its configuration is handed to each
//! invocation through the command environment and working directory.

use crate::error::ProvisionError;
use crate::layout::Layout;
use crate::utils::exec::{ensure_success, CommandExecutor};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const EASYRSA_CANDIDATES: [&str; 3] = [
    "/usr/share/easy-rsa/easyrsa",
    "/usr/share/easy-rsa/3/easyrsa",
    "/usr/share/easy-rsa/3.0/easyrsa",
];

/// Common names for the three certificates of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub hostname: String,
    pub ca_cn: String,
    pub server_cn: String,
    pub client_cn: String,
}

impl Identity {
    pub fn generate(hostname: &str) -> Self {
        use crate::utils::secret::common_name;
        Self {
            hostname: hostname.to_string(),
            ca_cn: common_name(hostname, "ca"),
            server_cn: common_name(hostname, "server"),
            client_cn: common_name(hostname, "client"),
        }
    }
}

/// Paths of everything issued into the PKI store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub dh_params: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl IssuedCredentials {
    pub fn in_store(pki_dir: &Path, identity: &Identity) -> Self {
        Self {
            ca_cert: pki_dir.join("ca.crt"),
            server_cert: pki_dir.join("issued").join(format!("{}.crt", identity.server_cn)),
            server_key: pki_dir.join("private").join(format!("{}.key", identity.server_cn)),
            dh_params: pki_dir.join("dh.pem"),
            client_cert: pki_dir.join("issued").join(format!("{}.crt", identity.client_cn)),
            client_key: pki_dir.join("private").join(format!("{}.key", identity.client_cn)),
        }
    }
}

/// A PKI store managed by one Easy-RSA script
pub struct Pki<'a> {
    exec: &'a dyn CommandExecutor,
    easyrsa: PathBuf,
    root: PathBuf,
    pki_dir: PathBuf,
    passphrase: String,
}

impl<'a> Pki<'a> {
    /// Locate Easy-RSA and bind it to the layout's PKI store
    pub fn locate(exec: &'a dyn CommandExecutor, layout: &Layout, passphrase: &str) -> Result<Self> {
        let mut easyrsa = None;
        for candidate in EASYRSA_CANDIDATES {
            if exec.file_exists(Path::new(candidate))? {
                easyrsa = Some(PathBuf::from(candidate));
                break;
            }
        }
        if easyrsa.is_none() && exec.check_command_exists("easyrsa")? {
            easyrsa = Some(PathBuf::from("easyrsa"));
        }
        let easyrsa = easyrsa.context(
            "Easy-RSA not found (looked in /usr/share/easy-rsa and on PATH); is the easy-rsa package installed?",
        )?;

        Ok(Self {
            exec,
            easyrsa,
            root: layout.pki_root.clone(),
            pki_dir: layout.pki_dir(),
            passphrase: passphrase.to_string(),
        })
    }

    fn easyrsa(&self, args: &[&str], common_name: Option<&str>) -> Result<()> {
        let pki_dir = self.pki_dir.to_string_lossy().to_string();
        let pass = format!("pass:{}", self.passphrase);
        let mut env = vec![
            ("EASYRSA_PKI", pki_dir.as_str()),
            ("EASYRSA_BATCH", "1"),
            ("EASYRSA_PASSIN", pass.as_str()),
            ("EASYRSA_PASSOUT", pass.as_str()),
        ];
        if let Some(cn) = common_name {
            env.push(("EASYRSA_REQ_CN", cn));
        }

        let program = self.easyrsa.to_string_lossy().to_string();
        let output = self
            .exec
            .execute_with_env(&program, args, Some(self.root.as_path()), &env)
            .with_context(|| format!("Failed to run easyrsa {}", args.join(" ")))?;
        ensure_success(&output, &format!("easyrsa {}", args.join(" ")))
    }

    /// Build a fresh CA, one server and one client certificate, and DH parameters.
    ///
    /// Keys are written unencrypted (`nopass`); the passphrase only satisfies
    /// Easy-RSA's prompts. Fails if the client material is missing afterwards.
    pub fn issue(&self, identity: &Identity) -> Result<IssuedCredentials> {
        self.exec.mkdir_p(&self.root)?;

        println!("Initializing PKI in {}...", self.pki_dir.display());
        self.easyrsa(&["init-pki"], None)?;

        println!("Building certificate authority ({})...", identity.ca_cn);
        self.easyrsa(&["build-ca", "nopass"], Some(&identity.ca_cn))?;

        println!("Issuing server certificate ({})...", identity.server_cn);
        self.easyrsa(&["build-server-full", &identity.server_cn, "nopass"], None)?;

        println!("Issuing client certificate ({})...", identity.client_cn);
        self.easyrsa(&["build-client-full", &identity.client_cn, "nopass"], None)?;

        println!("Generating Diffie-Hellman parameters (this can take a while)...");
        self.easyrsa(&["gen-dh"], None)?;

        let issued = IssuedCredentials::in_store(&self.pki_dir, identity);
        for path in [&issued.client_cert, &issued.client_key] {
            if !self.exec.file_exists(path)? {
                return Err(ProvisionError::MissingCredential(path.clone()).into());
            }
        }

        println!("✓ Certificates issued");
        Ok(issued)
    }
}
