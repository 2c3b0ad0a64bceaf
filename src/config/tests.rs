use super::*;

fn raw_with_origin() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.origin.url = Some("https://app.example".to_string());
    raw
}

#[test]
fn defaults_resolve_with_only_an_origin() {
    let settings = Settings::from_raw(raw_with_origin()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(10));
    assert_eq!(settings.origin.url.as_str(), "https://app.example/");
    assert_eq!(settings.cache.media_max_entries.get(), 60);
    assert_eq!(settings.cache.network_timeout(), Duration::from_millis(4000));
    assert!(settings.cache.skip_waiting);
    assert_eq!(settings.manifest.urls, vec!["/".to_string()]);
    assert_eq!(settings.classifier.rules, ClassifierRules::default());
    assert_eq!(settings.install.max_attempts.get(), 3);
}

#[test]
fn missing_origin_is_rejected() {
    let err = Settings::from_raw(RawSettings::default()).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { key: "origin.url", .. }));
}

#[test]
fn relative_origin_is_rejected() {
    let mut raw = RawSettings::default();
    raw.origin.url = Some("ftp://files.example".to_string());
    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { key: "origin.url", .. }));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = raw_with_origin();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.precache_tag = Some("v1".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        cache_precache_tag: Some("v2".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.precache_tag, "v2");
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = raw_with_origin();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_media_bound_is_rejected() {
    let mut raw = raw_with_origin();
    raw.cache.media_max_entries = Some(0);
    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.media_max_entries",
            ..
        }
    ));
}

#[test]
fn extensions_are_normalized() {
    let mut raw = raw_with_origin();
    raw.classifier.image_extensions = Some(vec![".PNG".to_string(), " avif ".to_string()]);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.classifier.rules.image_extensions,
        vec!["png".to_string(), "avif".to_string()]
    );
}

#[test]
fn api_prefix_must_be_a_path() {
    let mut raw = raw_with_origin();
    raw.classifier.api_prefix = Some("api".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cache_config_mirrors_cache_settings() {
    let mut raw = raw_with_origin();
    raw.cache.fallback_image = Some("/icon-192.png".to_string());
    raw.cache.network_timeout_ms = Some(250);
    let settings = Settings::from_raw(raw).expect("valid settings");

    let config = settings.cache_config();
    assert_eq!(config.fallback_image.as_deref(), Some("/icon-192.png"));
    assert_eq!(config.network_timeout_ms, 250);
    assert_eq!(config.namespace_prefix, "offgrid");
}

#[test]
fn network_timeout_milliseconds_pass_through_unchanged() {
    let mut raw = raw_with_origin();
    raw.cache.network_timeout_ms = Some(u64::MAX);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache_config().network_timeout_ms, u64::MAX);

    let mut raw = raw_with_origin();
    raw.cache.network_timeout_ms = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["offgrid"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "offgrid",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--origin-url",
        "https://override.example",
        "--cache-skip-waiting",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.origin_url.as_deref(),
                Some("https://override.example")
            );
            assert_eq!(serve.overrides.cache_skip_waiting, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_classify_arguments() {
    let args = CliArgs::parse_from([
        "offgrid",
        "classify",
        "https://app.example/logo.png",
        "--destination",
        "image",
        "--navigate",
    ]);

    match args.command.expect("classify command") {
        Command::Classify(classify) => {
            assert_eq!(classify.url, "https://app.example/logo.png");
            assert_eq!(classify.method, "GET");
            assert_eq!(classify.destination.as_deref(), Some("image"));
            assert!(classify.navigate);
            assert!(classify.accept.is_none());
        }
        _ => panic!("wrong command parsed"),
    }
}
