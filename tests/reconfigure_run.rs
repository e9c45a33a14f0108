//! End-to-end reconfiguration runs against the project fixture
//!
//! Covers loading `recon.toml`, patch files on disk, rendering both
//! artifacts, replacement files, idempotent re-runs, source disabling and
//! error exit codes.

mod fixtures;

use std::fs;

use fixtures::{variable_overrides, Project};
use recon_overlay::overlay::OverlayError;
use recon_overlay::pipeline::{ArtifactStatus, RunError};
use recon_overlay::{ConfigValue, FragmentId, RenderError, TreePath};

fn compose(project: &Project) -> ConfigValue {
    serde_yaml::from_str(&project.read_output("docker-compose.yml")).unwrap()
}

fn text<'a>(tree: &'a ConfigValue, path: &str) -> Option<&'a str> {
    tree.get(path).and_then(|v| v.as_str())
}

#[test]
fn test_render_applies_all_enabled_sources() {
    let project = Project::copy();
    let report = project.pipeline(None).unwrap().execute(false).unwrap();

    assert_eq!(report.written(), 2);
    assert_eq!(report.sources, ["dev-mounts", "user"]);
    assert_eq!(report.fragments_applied, 5);

    let tree = compose(&project);
    assert_eq!(text(&tree, "services.web.image"), Some("shop/web:dev"));
    assert_eq!(text(&tree, "services.web.environment.DB_HOST"), Some("mysql"));
    assert_eq!(text(&tree, "services.web.environment.DEBUG"), Some("1"));
    assert_eq!(text(&tree, "services.web.volumes.1"), Some("./src:/app/src"));
    assert!(tree.get("services.cache").is_none());
    assert_eq!(tree.get("volumes.data"), Some(&ConfigValue::mapping()));

    assert_eq!(
        project.read_output(".env"),
        "APP_ENV=development\nDB_HOST=mysql\nXDEBUG_MODE=debug\n"
    );
}

#[test]
fn test_second_run_writes_nothing() {
    let project = Project::copy();
    project.pipeline(None).unwrap().execute(false).unwrap();
    let state_before = project.read_output(".recon-state.json");

    let report = project.pipeline(None).unwrap().execute(false).unwrap();
    assert_eq!(report.written(), 0);
    assert!(report
        .artifacts
        .iter()
        .all(|a| a.status == ArtifactStatus::Unchanged));
    assert_eq!(project.read_output(".recon-state.json"), state_before);
}

#[test]
fn test_variable_change_triggers_rewrite() {
    let project = Project::copy();
    project.pipeline(None).unwrap().execute(false).unwrap();

    let overrides = variable_overrides(&[("DB_HOST", "db.local")]);
    let report = project
        .pipeline(Some(overrides.clone()))
        .unwrap()
        .execute(false)
        .unwrap();
    assert_eq!(report.written(), 2);
    assert!(project.read_output(".env").contains("DB_HOST=db.local\n"));

    let again = project.pipeline(Some(overrides)).unwrap().execute(false).unwrap();
    assert_eq!(again.written(), 0);
}

#[test]
fn test_deleted_artifact_is_rewritten() {
    let project = Project::copy();
    project.pipeline(None).unwrap().execute(false).unwrap();
    fs::remove_file(project.output_path(".env")).unwrap();

    let report = project.pipeline(None).unwrap().execute(false).unwrap();
    let written: Vec<&str> = report
        .artifacts
        .iter()
        .filter(|a| a.status == ArtifactStatus::Written)
        .map(|a| a.path.as_str())
        .collect();
    assert_eq!(written, [".env"]);
    assert!(project.output_path(".env").exists());
}

#[test]
fn test_dry_run_leaves_output_untouched() {
    let project = Project::copy();
    let report = project.pipeline(None).unwrap().execute(true).unwrap();

    assert!(report.dry_run);
    assert!(report
        .artifacts
        .iter()
        .all(|a| a.status == ArtifactStatus::WouldWrite));
    assert!(!project.root().join("env").exists());
}

#[test]
fn test_disabling_source_restores_base_values() {
    let project = Project::copy();
    project.pipeline(None).unwrap().execute(false).unwrap();

    let report = project
        .pipeline(None)
        .unwrap()
        .disable_source("dev-mounts")
        .execute(false)
        .unwrap();
    assert_eq!(report.sources, ["user"]);

    let tree = compose(&project);
    assert_eq!(text(&tree, "services.web.image"), Some("shop/web:1.4"));
    assert_eq!(text(&tree, "services.cache.image"), Some("redis:7"));
    assert_eq!(text(&tree, "services.web.environment.DEBUG"), Some("1"));
    assert_eq!(project.read_output(".env"), "APP_ENV=production\nDB_HOST=mysql\n");
}

#[test]
fn test_explain_reports_provenance() {
    let project = Project::copy();
    let resolved = project.pipeline(None).unwrap().resolve().unwrap();

    let origin = |p: &str| resolved.origin(&TreePath::parse(p).unwrap()).cloned();
    assert_eq!(
        origin("compose.services.web.image"),
        Some(FragmentId::new("dev-mounts", "web-image"))
    );
    assert_eq!(
        origin("compose.services.web.environment.DEBUG"),
        Some(FragmentId::new("user", "debug"))
    );
    assert_eq!(origin("dotenv.DB_HOST"), None);

    let env_claims = resolved.claims_under(&TreePath::parse("dotenv").unwrap());
    let paths: Vec<String> = env_claims.iter().map(|c| c.path.to_string()).collect();
    assert_eq!(paths, ["dotenv.APP_ENV", "dotenv.DB_HOST", "dotenv.XDEBUG_MODE"]);
}

#[test]
fn test_fragments_listed_in_resolution_order() {
    let project = Project::copy();
    let registry = project.pipeline(None).unwrap().registry().unwrap();

    let order: Vec<String> = registry
        .list_fragments()
        .iter()
        .map(|f| f.id().to_string())
        .collect();
    assert_eq!(
        order,
        [
            "dev-mounts/app-env",
            "dev-mounts/no-cache",
            "dev-mounts/src-mount",
            "dev-mounts/web-image",
            "user/debug",
        ]
    );
}

#[test]
fn test_unresolved_variable_aborts_before_writing() {
    let project = Project::copy();
    project.edit_config("DB_HOST = \"mysql\"", "DB_PORT = \"3306\"");

    let err = project.pipeline(None).unwrap().execute(false).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    match err {
        RunError::Render(RenderError::UnresolvedVariable { path, variable }) => {
            assert_eq!(path.to_string(), "compose.services.web.environment.DB_HOST");
            assert_eq!(variable, "DB_HOST");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!project.root().join("env").exists());
}

#[test]
fn test_enabling_conflicting_source_fails() {
    let project = Project::copy();
    project.edit_config(
        "path = \"patches/profiling.json\"\nenabled = false",
        "path = \"patches/profiling.json\"\nenabled = true",
    );

    let err = project.pipeline(None).unwrap().execute(false).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    match err {
        RunError::Overlay(OverlayError::Conflict { path, contending, .. }) => {
            assert_eq!(path.to_string(), "compose.services.web.image");
            assert_eq!(
                contending,
                [
                    FragmentId::new("dev-mounts", "web-image"),
                    FragmentId::new("profiling", "web-image"),
                ]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_disabling_one_side_of_a_conflict_resolves_it() {
    let project = Project::copy();
    project.edit_config(
        "path = \"patches/profiling.json\"\nenabled = false",
        "path = \"patches/profiling.json\"\nenabled = true",
    );

    project
        .pipeline(None)
        .unwrap()
        .disable_source("dev-mounts")
        .execute(false)
        .unwrap();
    assert_eq!(text(&compose(&project), "services.web.image"), Some("shop/web:profile"));
}

#[test]
fn test_invalid_patch_file_is_user_error() {
    let project = Project::copy();
    project.write("patches/user.yaml", "patch:\n  - name: broken\n    path: a\n    op: merge\n");

    let err = match project.pipeline(None) {
        Ok(_) => panic!("patch without a value should be rejected"),
        Err(e) => e,
    };
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("requires a value"));
}

#[test]
fn test_replacement_file_written_verbatim() {
    let project = Project::copy();
    let conf = "server {\n  listen ${NGINX_PORT};\n}\n";
    project.write("overrides/nginx.conf", conf);
    project.edit_config(
        "tree = \"dotenv\"",
        "tree = \"dotenv\"\n\n[[artifacts]]\npath = \"nginx/nginx.conf\"\nsource = \"overrides/nginx.conf\"",
    );

    let report = project.pipeline(None).unwrap().execute(false).unwrap();
    assert_eq!(report.written(), 3);
    assert_eq!(project.read_output("nginx/nginx.conf"), conf);

    project.write("overrides/nginx.conf", "server {\n  listen 8080;\n}\n");
    let report = project.pipeline(None).unwrap().execute(false).unwrap();
    let written: Vec<&str> = report
        .artifacts
        .iter()
        .filter(|a| a.status == ArtifactStatus::Written)
        .map(|a| a.path.as_str())
        .collect();
    assert_eq!(written, ["nginx/nginx.conf"]);
}

#[test]
fn test_missing_replacement_file_is_user_error() {
    let project = Project::copy();
    project.edit_config(
        "tree = \"dotenv\"",
        "tree = \"dotenv\"\n\n[[artifacts]]\npath = \"Caddyfile\"\nsource = \"overrides/Caddyfile\"",
    );

    let err = project.pipeline(None).unwrap().execute(false).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(matches!(err, RunError::Render(RenderError::ReplacementFile { .. })));
    assert!(!project.root().join("env").exists());
}

#[test]
fn test_value_file_edit_triggers_rewrite() {
    let project = Project::copy();
    project.write("patches/values/debug.yaml", "DEBUG: \"1\"\n");
    project.write(
        "patches/user.yaml",
        "priority: 20\npatch:\n  - name: debug\n    path: compose.services.web.environment\n    op: merge\n    value_file: values/debug.yaml\n",
    );

    project.pipeline(None).unwrap().execute(false).unwrap();
    assert_eq!(text(&compose(&project), "services.web.environment.DEBUG"), Some("1"));

    // Fragment digests cover the loaded value, so every artifact is stale
    project.write("patches/values/debug.yaml", "DEBUG: \"2\"\n");
    let report = project.pipeline(None).unwrap().execute(false).unwrap();
    assert_eq!(report.written(), 2);
    assert_eq!(text(&compose(&project), "services.web.environment.DEBUG"), Some("2"));
}
