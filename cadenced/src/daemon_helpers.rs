fn resolve_token(config: &DaemonConfig, credentials: &CredentialStore) -> anyhow::Result<String> {
    if let Some(token) = &config.token {
        if let Err(err) = credentials.save_token(token) {
            warn!(error = %err, "could not persist CADENCE_TOKEN in the keyring");
        }
        return Ok(token.clone());
    }
    match credentials.get_token() {
        Ok(token) => Ok(token),
        Err(CredentialError::TokenNotFound) => {
            anyhow::bail!("no API token: set CADENCE_TOKEN or store one in the keyring")
        }
        Err(err) => Err(err).context("failed to read API token from keyring"),
    }
}

fn connectivity_for(api_url: &Url) -> Arc<dyn Connectivity> {
    match TcpReachability::for_url(api_url) {
        Some(probe) => Arc::new(probe),
        None => Arc::new(AlwaysOnline),
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DATA_DIR_NAME)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
