use super::*;

fn configured_raw() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.mirror.root_path = Some(PathBuf::from("/var/cache/wiki"));
    raw.mirror.render_base_url = Some("https://wiki.example.com/".to_string());
    raw.mirror.username = Some("mirror".to_string());
    raw.mirror.password = Some("secret".to_string());
    raw
}

#[test]
fn defaults_leave_the_mirror_unconfigured() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(!settings.mirror.is_configured());
    assert!(settings.mirror.layout().is_none());
    assert_eq!(settings.mirror.debounce, Duration::from_secs(10));
    assert_eq!(settings.mirror.nocache_label, "nocache");
    assert!(settings.mirror.reconcile_on_startup);
    assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(settings.content.api_url.is_none());
    assert_eq!(settings.content.page_limit.get(), DEFAULT_PAGE_LIMIT);
}

#[test]
fn complete_mirror_section_is_configured() {
    let settings = Settings::from_raw(configured_raw()).expect("valid settings");

    assert!(settings.mirror.is_configured());
    let layout = settings.mirror.layout().expect("layout");
    assert_eq!(layout.root(), std::path::Path::new("/var/cache/wiki"));
    assert_eq!(
        settings.content.api_url.as_ref().map(Url::as_str),
        Some("https://wiki.example.com/")
    );
}

#[test]
fn missing_credentials_keep_the_mirror_unconfigured() {
    let mut raw = configured_raw();
    raw.mirror.username = None;
    raw.mirror.password = None;

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.mirror.is_configured());
}

#[test]
fn half_specified_credentials_are_rejected() {
    let mut raw = configured_raw();
    raw.mirror.password = None;

    let err = Settings::from_raw(raw).expect_err("username without password");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "mirror.username",
            ..
        }
    ));
}

#[test]
fn render_base_url_must_be_http() {
    let mut raw = configured_raw();
    raw.mirror.render_base_url = Some("ftp://wiki.example.com".to_string());

    let err = Settings::from_raw(raw).expect_err("ftp is not supported");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "mirror.render_base_url",
            ..
        }
    ));
}

#[test]
fn blank_nocache_label_is_rejected() {
    let mut raw = RawSettings::default();
    raw.mirror.nocache_label = Some("  ".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn content_api_url_overrides_render_base() {
    let mut raw = configured_raw();
    raw.content.api_url = Some("https://api.example.com/wiki/".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.content.api_url.as_ref().map(Url::as_str),
        Some("https://api.example.com/wiki/")
    );
}

#[test]
fn zero_page_limit_is_rejected() {
    let mut raw = RawSettings::default();
    raw.content.page_limit = Some(0);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = configured_raw();
    raw.server.admin_port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.mirror.debounce_ms = Some(10_000);

    let overrides = ServeOverrides {
        admin_port: Some(4321),
        log_level: Some("debug".to_string()),
        mirror: MirrorOverrides {
            cache_root: Some(PathBuf::from("/srv/mirror")),
            debounce_ms: Some(250),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.admin_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.mirror.debounce, Duration::from_millis(250));
    assert_eq!(
        settings.mirror.root_path.as_deref(),
        Some(std::path::Path::new("/srv/mirror"))
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["wikimirror"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_rebuild_arguments() {
    let args = CliArgs::parse_from([
        "wikimirror",
        "rebuild",
        "--space",
        "DOC",
        "--cache-root",
        "/tmp/mirror",
        "--debounce-ms",
        "0",
    ]);

    match args.command.expect("rebuild command") {
        Command::Rebuild(rebuild) => {
            assert_eq!(rebuild.space.as_deref(), Some("DOC"));
            assert_eq!(rebuild.mirror.debounce_ms, Some(0));
            assert_eq!(
                rebuild.mirror.cache_root.as_deref(),
                Some(std::path::Path::new("/tmp/mirror"))
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn rebuild_overrides_apply_to_mirror_settings() {
    let mut raw = configured_raw();
    let args = RebuildArgs {
        mirror: MirrorOverrides {
            render_base_url: Some("http://localhost:8090/".to_string()),
            ..Default::default()
        },
        log_level: Some("warn".to_string()),
        ..Default::default()
    };

    raw.apply_rebuild_overrides(&args);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert_eq!(
        settings.mirror.render_base_url.as_ref().map(Url::as_str),
        Some("http://localhost:8090/")
    );
}
