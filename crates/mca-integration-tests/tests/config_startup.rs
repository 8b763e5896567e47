//! Integration tests for starting the host from layered configuration.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mca_config::loader::load;
use mca_config::{ConfigError, LoadOptions};
use mca_crypto::testing::{RsaSigner, sign_artifact};
use mca_crypto::{TrustConfig, TrustPolicy, TrustStatus};
use mca_extensions::testing::{RecordingRuntime, WasmModuleBuilder};
use mca_extensions::{CapabilityAllowList, ExtensionRegistry};
use mca_tasks::TaskExecutor;

fn write(dir: &Path, file: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn configured_keys_and_allow_list_drive_loading() {
    let root = tempfile::tempdir().unwrap();
    let ext_dir = root.path().join("ext");
    std::fs::create_dir(&ext_dir).unwrap();

    let signer = RsaSigner::generate().unwrap();
    let module = WasmModuleBuilder::new().import("os", "getenv").build();
    std::fs::write(ext_dir.join("signed.wasm"), &module).unwrap();
    sign_artifact(&ext_dir.join("signed.wasm"), &signer).unwrap();
    std::fs::write(
        ext_dir.join("netty.wasm"),
        WasmModuleBuilder::new().import("net", "open").build(),
    )
    .unwrap();

    let explicit = write(
        root.path(),
        "mca.toml",
        &format!(
            "[trust]\nrequired = true\npublic_keys = ['''{}''']\n\n[capabilities]\nallowed_imports = [\"os\"]\n\n[executor]\nworkers = 2\n",
            signer.pem
        ),
    );
    let resolved = load(&LoadOptions {
        user_config_dir: None,
        explicit: Some(explicit),
        env: HashMap::from([(
            "MCA_EXTENSIONS_DIR".to_owned(),
            ext_dir.display().to_string(),
        )]),
    })
    .unwrap();
    let cfg = resolved.config;
    assert_eq!(resolved.env_overrides, 1);

    let trust = TrustConfig {
        required: cfg.trust.required,
        public_keys: cfg.trust.public_keys.clone(),
        verify_if_present: cfg.trust.verify_if_present,
    };
    let runtime = RecordingRuntime::new();
    let reg = ExtensionRegistry::builder(TrustPolicy::new(&trust).unwrap(), Arc::new(runtime.clone()))
        .allow_list(CapabilityAllowList::new(&cfg.capabilities.allowed_imports))
        .entry_point(&cfg.extensions.entry_point)
        .build();
    reg.load_all(Path::new(&cfg.extensions.dir)).unwrap();

    assert_eq!(runtime.instantiated(), ["signed"]);
    assert_eq!(reg.get("signed").unwrap().trust(), TrustStatus::Verified);
    assert_eq!(reg.rejected()[0].offending, ["net"]);

    let executor = TaskExecutor::new(cfg.executor.workers).unwrap();
    assert_eq!(executor.workers(), 2);
    assert!(
        executor
            .shutdown_and_drain(Duration::from_millis(cfg.executor.drain_timeout_ms))
            .await
    );
}

#[test]
fn path_in_public_keys_fails_validation() {
    let root = tempfile::tempdir().unwrap();
    let explicit = write(
        root.path(),
        "mca.toml",
        "[trust]\npublic_keys = [\"/etc/mca/key.pem\"]\n",
    );
    let result = load(&LoadOptions {
        explicit: Some(explicit),
        ..LoadOptions::default()
    });
    assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
}
