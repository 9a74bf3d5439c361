use super::*;

#[test]
fn test_build_config_log_levels() {
    let cli = Cli::try_parse_from(["bblkg", "--verbose", "cache", "info"]).unwrap();
    assert_eq!(cli.build_config().log_level.as_deref(), Some("debug"));

    let cli = Cli::try_parse_from(["bblkg", "cache", "info", "-q"]).unwrap();
    assert_eq!(cli.build_config().log_level.as_deref(), Some("error"));

    let cli = Cli::try_parse_from(["bblkg", "cache", "clean"]).unwrap();
    assert_eq!(cli.build_config().log_level, None);
}

#[test]
fn test_verbose_and_quiet_conflict() {
    assert!(Cli::try_parse_from(["bblkg", "-v", "-q", "cache", "info"]).is_err());
}

#[test]
fn test_config_path_flag() {
    let cli = Cli::try_parse_from(["bblkg", "--config", "build/lkg.toml", "pull", "Foo"]).unwrap();
    assert_eq!(cli.build_config().config_path, PathBuf::from("build/lkg.toml"));
}

#[test]
fn test_request_args_build_static_request() {
    let cli = Cli::try_parse_from([
        "bblkg",
        "resolve",
        "Foo",
        "--platform",
        "winx64",
        "--context",
        "FooParts",
        "--part",
        "Lib",
        "--static-dir",
        "Foo/Static",
        "--product",
    ])
    .unwrap();
    let Commands::Resolve(cmd) = cli.command else {
        panic!("expected resolve");
    };
    let request = cmd.request.to_request();
    assert_eq!(request.source, "Foo");
    assert_eq!(request.platform, "winx64");
    assert_eq!(request.part, crate::resolver::PartRef::new("FooParts", "Lib"));
    assert!(request.is_static);
    assert!(request.is_product);
    assert_eq!(request.context_dir.as_deref(), Some("Foo/Static"));
    assert!(request.parent.is_none());
}

#[test]
fn test_parent_requires_both_halves() {
    let base = ["bblkg", "resolve", "Foo", "-p", "x64", "--context", "C", "--part", "P"];

    let mut args = base.to_vec();
    args.extend(["--parent-context", "Parent"]);
    assert!(Cli::try_parse_from(args).is_err());

    let mut args = base.to_vec();
    args.extend(["--parent-context", "Parent", "--parent-part", "Main"]);
    let cli = Cli::try_parse_from(args).unwrap();
    let Commands::Resolve(cmd) = cli.command else {
        panic!("expected resolve");
    };
    assert_eq!(cmd.request.to_request().parent, Some(crate::resolver::PartRef::new("Parent", "Main")));
}

#[test]
fn test_pull_requires_a_source() {
    assert!(Cli::try_parse_from(["bblkg", "pull"]).is_err());
}
