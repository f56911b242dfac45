use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Dev,
    Test,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Dev => "dev",
            DeploymentEnv::Test => "test",
            DeploymentEnv::Local => "local",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Dev => "Devnet",
            DeploymentEnv::Test => "Testnet",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// Addresses of the wagering token and the betting contract on one network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub network_url: String,
    pub token_address: String,
    pub betting_address: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub token_ticker: Option<String>,
    #[serde(default)]
    pub token_decimals: Option<u8>,
    #[serde(default)]
    pub deployment_block_height: Option<u64>,
}

impl DeploymentRecord {
    pub fn decimals(&self) -> u8 {
        self.token_decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS)
    }

    pub fn ticker(&self) -> &str {
        self.token_ticker.as_deref().unwrap_or("BETZ")
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::in_root(DEPLOYMENTS_ROOT, env)
    }

    pub fn in_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: DeploymentRecord) -> Result<()> {
        write_record(&self.path, &record)
    }
}

pub fn ensure_structure(root: impl AsRef<Path>) -> Result<()> {
    for env in [
        DeploymentEnv::Dev,
        DeploymentEnv::Test,
        DeploymentEnv::Local,
    ] {
        let _ = ensure_store(root.as_ref(), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    if !root.exists() {
        fs::create_dir_all(root).with_context(|| {
            format!("Failed to create deployments directory {}", root.display())
        })?;
    }

    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create {} deployments directory", env.dir_name())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"").with_context(|| {
            format!("Failed to initialize deployment record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.is_empty() || data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}

pub fn record_deployment(
    store: &DeploymentStore,
    network_url: impl AsRef<str>,
    token_address: impl AsRef<str>,
    betting_address: impl AsRef<str>,
    chain_id: Option<u64>,
) -> Result<DeploymentRecord> {
    let record = DeploymentRecord {
        deployed_at: Utc::now().to_rfc3339(),
        network_url: network_url.as_ref().to_string(),
        token_address: token_address.as_ref().to_string(),
        betting_address: betting_address.as_ref().to_string(),
        chain_id,
        token_ticker: None,
        token_decimals: None,
        deployment_block_height: None,
    };
    store.save(record.clone())?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn load__returns_none_for_fresh_store() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(dir.path(), DeploymentEnv::Local).unwrap();

        // when
        let loaded = store.load().unwrap();

        // then
        assert!(loaded.is_none());
        assert!(store.path().ends_with("local/deployments.json"));
    }

    #[test]
    fn record_deployment__round_trips_through_store() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(dir.path(), DeploymentEnv::Dev).unwrap();

        // when
        let saved = record_deployment(
            &store,
            "http://localhost:8545",
            "0x2279B7A0a67DB372996a5FaB50D91eAA73d2eBe6",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            Some(31337),
        )
        .unwrap();

        // then
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.decimals(), DEFAULT_TOKEN_DECIMALS);
        assert_eq!(loaded.ticker(), "BETZ");
    }

    #[test]
    fn load__takes_last_entry_of_a_record_list() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(dir.path(), DeploymentEnv::Test).unwrap();
        let json = r#"[
            {"deployed_at": "a", "network_url": "u", "token_address": "t1", "betting_address": "b1"},
            {"deployed_at": "b", "network_url": "u", "token_address": "t2", "betting_address": "b2", "token_decimals": 6}
        ]"#;
        fs::write(store.path(), json).unwrap();

        // when
        let loaded = store.load().unwrap().unwrap();

        // then
        assert_eq!(loaded.token_address, "t2");
        assert_eq!(loaded.decimals(), 6);
    }

    #[test]
    fn load__rejects_garbage() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(dir.path(), DeploymentEnv::Test).unwrap();
        fs::write(store.path(), "not json").unwrap();

        // when
        let result = store.load();

        // then
        assert!(result.is_err());
    }
}
