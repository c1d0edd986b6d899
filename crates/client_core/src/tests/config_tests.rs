use super::*;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn defaults_poll_a_local_backend_on_known_networks() {
    let settings = ClientSettings::default();
    assert_eq!(settings.backend_url.as_str(), "http://127.0.0.1:8000/");
    assert_eq!(settings.transport, TransportKind::Poll);
    assert_eq!(settings.poll_interval, Duration::from_secs(5));
    assert!(settings.supports(&NetworkId::new("0x1")));
    assert!(settings.supports(&NetworkId::new("11155111")));
    assert!(settings.supports(&NetworkId::new("0x7A69")));
    assert!(!settings.supports(&NetworkId::new("0x89")));
}

#[test]
fn mint_prefixed_env_wins_over_app_prefix() {
    let mut settings = ClientSettings::default();
    apply_env(
        &mut settings,
        &env(&[
            ("MINT_BACKEND_URL", "https://mint.example"),
            ("APP__BACKEND_URL", "https://ignored.example"),
            ("APP__TRANSPORT", "websocket"),
            ("MINT_POLL_INTERVAL_MS", "250"),
            ("APP__PUSH_MAX_RECONNECTS", "2"),
            ("MINT_SUPPORTED_NETWORKS", "0x89, 137 ,"),
        ]),
    );

    assert_eq!(settings.backend_url.as_str(), "https://mint.example/");
    assert_eq!(settings.transport, TransportKind::Push);
    assert_eq!(settings.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.push_max_reconnects, 2);
    assert_eq!(
        settings.supported_networks,
        vec![NetworkId::new("0x89"), NetworkId::new("0x89")]
    );
    assert!(!settings.supports(&NetworkId::new(MAINNET)));
}

#[test]
fn backend_url_parses_or_reports_transport_error() {
    let mut settings = ClientSettings::default();
    assert_eq!(
        settings.parsed_backend_url().expect("default url").as_str(),
        DEFAULT_BACKEND_URL
    );

    settings.backend_url = "127.0.0.1 port eight thousand".to_string();
    assert!(matches!(
        settings.parsed_backend_url(),
        Err(MintError::Transport { .. })
    ));
}

#[test]
fn invalid_env_values_keep_defaults() {
    let mut settings = ClientSettings::default();
    apply_env(
        &mut settings,
        &env(&[
            ("MINT_BACKEND_URL", "ftp://files.example"),
            ("MINT_TRANSPORT", "carrier-pigeon"),
            ("MINT_POLL_INTERVAL_MS", "0"),
            ("MINT_PUSH_RECONNECT_DELAY_MS", "soon"),
            ("MINT_SUPPORTED_NETWORKS", " , "),
        ]),
    );
    let defaults = ClientSettings::default();

    assert_eq!(settings.backend_url, defaults.backend_url);
    assert_eq!(settings.transport, defaults.transport);
    assert_eq!(settings.poll_interval, defaults.poll_interval);
    assert_eq!(settings.push_reconnect_delay, defaults.push_reconnect_delay);
    assert_eq!(settings.supported_networks, defaults.supported_networks);
}

#[test]
fn settings_file_is_applied_and_env_overrides_it() {
    let dir = std::env::temp_dir().join(format!("mint-client-config-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("mint-client.toml");
    fs::write(
        &path,
        r#"
backend_url = "http://10.0.0.5:9000/api"
transport = "push"
poll_interval_ms = 1500
push_reconnect_delay_ms = 50
supported_networks = ["0xaa36a7"]
"#,
    )
    .expect("write settings file");

    let mut settings = ClientSettings::default();
    apply_file(&mut settings, &path);
    assert_eq!(settings.backend_url.as_str(), "http://10.0.0.5:9000/api");
    assert_eq!(settings.transport, TransportKind::Push);
    assert_eq!(settings.poll_interval, Duration::from_millis(1500));
    assert_eq!(settings.push_reconnect_delay, Duration::from_millis(50));
    assert_eq!(settings.supported_networks, vec![NetworkId::new(SEPOLIA)]);

    apply_env(&mut settings, &env(&[("MINT_TRANSPORT", "poll")]));
    assert_eq!(settings.transport, TransportKind::Poll);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unreadable_settings_file_is_ignored() {
    let dir = std::env::temp_dir().join(format!("mint-client-bad-config-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("mint-client.toml");
    fs::write(&path, "backend_url = [not toml").expect("write settings file");

    let mut settings = ClientSettings::default();
    apply_file(&mut settings, &path);
    apply_file(&mut settings, &dir.join("missing.toml"));
    assert_eq!(settings.backend_url, ClientSettings::default().backend_url);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn transport_kind_accepts_common_spellings() {
    assert_eq!(TransportKind::parse("Polling"), Some(TransportKind::Poll));
    assert_eq!(TransportKind::parse(" ws "), Some(TransportKind::Push));
    assert_eq!(TransportKind::parse("sse"), None);
}
