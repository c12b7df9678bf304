// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use garm_core::{OsArch, OsType};

use super::*;

/// Write a fake plugin script that branches on `$GARM_COMMAND` and returns
/// JSON on stdout, mirroring the real contract in spec §6.
fn write_fake_plugin(dir: &tempfile::TempDir, script: &str) -> std::path::PathBuf {
    let path = dir.path().join("fake-provider.sh");
    let mut file = std::fs::File::create(&path).expect("create script");
    writeln!(file, "#!/bin/sh\n{script}").expect("write script");
    let mut perms = file.metadata().expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}

fn bootstrap_args() -> BootstrapInstance {
    BootstrapInstance {
        name: "runner-1".to_string(),
        tools: vec![],
        forge_url: "https://github.com/acme/repo".to_string(),
        jit_token: "jit-token".to_string(),
        os_type: OsType::Linux,
        os_arch: OsArch::Amd64,
        flavor: "small".to_string(),
        image: "ubuntu:22.04".to_string(),
        extra_specs: Default::default(),
        github_runner_group: None,
        base_params: BaseParams {
            metadata_url: "https://meta".to_string(),
            callback_url: "https://callback".to_string(),
            webhook_url: "https://webhook".to_string(),
            controller_id: "ctrl-1".to_string(),
        },
    }
}

#[tokio::test]
async fn create_instance_parses_stdout_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fake_plugin(
        &dir,
        r#"echo '{"provider_id":"p-1","name":"runner-1","os_type":"linux","os_arch":"amd64","status":"running","addresses":["10.0.0.1"]}'
exit 0"#,
    );
    let provider = ExecProvider::new("lxd", script, dir.path().join("config.toml"), "ctrl-1");
    let args = bootstrap_args();
    let base_params = args.base_params.clone();

    let instance = provider.create_instance("pool-1", "inst-1", &args, &base_params).await.expect("create");
    assert_eq!(instance.provider_id, "p-1");
    assert_eq!(instance.status, ProviderInstanceStatus::Running);
    assert_eq!(instance.addresses, vec!["10.0.0.1".to_string()]);
}

#[tokio::test]
async fn not_found_exit_code_maps_to_typed_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fake_plugin(&dir, "exit 2");
    let provider = ExecProvider::new("lxd", script, dir.path().join("config.toml"), "ctrl-1");

    let err = provider.get_instance("pool-1", "inst-1").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound));
}

#[tokio::test]
async fn delete_swallows_duplicate_and_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fake_plugin(&dir, "exit 3");
    let provider = ExecProvider::new("lxd", script, dir.path().join("config.toml"), "ctrl-1");

    provider.delete_instance("pool-1", "inst-1").await.expect("idempotent success");
}

#[tokio::test]
async fn generic_failure_carries_stderr() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fake_plugin(&dir, "echo 'boom' 1>&2\nexit 1");
    let provider = ExecProvider::new("lxd", script, dir.path().join("config.toml"), "ctrl-1");

    let err = provider.get_instance("pool-1", "inst-1").await.unwrap_err();
    match err {
        ProviderError::PluginFailed { code, stderr } => {
            assert_eq!(code, 1);
            assert!(stderr.contains("boom"));
        }
        other => panic!("expected PluginFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn env_vars_are_forwarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fake_plugin(
        &dir,
        r#"echo "{\"provider_id\":\"$GARM_INSTANCE_ID\",\"name\":\"x\",\"os_type\":\"linux\",\"os_arch\":\"amd64\",\"status\":\"running\"}""#,
    );
    let provider = ExecProvider::new("lxd", script, dir.path().join("config.toml"), "ctrl-1");

    let instance = provider.get_instance("pool-1", "inst-42").await.expect("get");
    assert_eq!(instance.provider_id, "inst-42");
}
