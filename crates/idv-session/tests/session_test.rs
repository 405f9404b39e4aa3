//! Integration tests: session state machine, activation gateway and the
//! UI-facing service, against a temp-dir vault and a recording proxy.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use idv_core::{ActiveIdentity, IdentityCandidate, ProxyError, StateTag, Vault, VaultError};
use idv_crypto::KdfParams;
use idv_proxy::{ProxyControl, ProxyHealth};
use idv_session::{EnrollmentRequest, Session, UploadRequest, VaultService};
use idv_vault::{VaultEvent, VaultStore};
use secrecy::SecretString;
use serde_json::{json, Value};
use tempfile::TempDir;

const PASSWORD: &str = "correcthorse123";

/// In-memory proxy that records every call in order. Like the real proxy,
/// it names active credentials with ids of its own (`zid-1`, `zid-2`, ...).
#[derive(Default)]
struct RecordingProxy {
    calls: Mutex<Vec<String>>,
    next_id: Mutex<usize>,
    active: Mutex<Vec<ActiveIdentity>>,
    fail_push: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    down: Mutex<bool>,
}

impl RecordingProxy {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn set_active(&self, ids: &[&str]) {
        *self.active.lock().unwrap() = ids
            .iter()
            .map(|id| ActiveIdentity {
                identity_id: id.to_string(),
                identity_name: String::new(),
                services: vec![],
            })
            .collect();
    }

    /// Simulate the proxy dropping a credential on its own (e.g. a restart).
    fn forget_named(&self, name: &str) {
        self.active
            .lock()
            .unwrap()
            .retain(|a| a.identity_name != name);
    }

    fn check_up(&self) -> Result<(), ProxyError> {
        if *self.down.lock().unwrap() {
            return Err(ProxyError::ConnectionRefused("http://127.0.0.1:8081/".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyControl for RecordingProxy {
    async fn enroll(&self, jwt: &str) -> Result<Value, ProxyError> {
        self.check_up()?;
        self.record(format!("enroll {jwt}"));
        Ok(json!({"ztAPI": "https://ctrl.example:1280", "id": {"cert": "pem"}}))
    }

    async fn push_identity(&self, credential: &Value) -> Result<(), ProxyError> {
        self.check_up()?;
        let id = credential["id"].as_str().unwrap_or("?").to_string();
        self.record(format!("push {id}"));
        if self.fail_push.lock().unwrap().contains(&id) {
            return Err(ProxyError::Status {
                status: 400,
                body: "bad identity".into(),
            });
        }
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        self.active.lock().unwrap().push(ActiveIdentity {
            identity_id: format!("zid-{next}"),
            identity_name: id,
            services: vec![],
        });
        Ok(())
    }

    async fn list_identities(&self) -> Result<Vec<ActiveIdentity>, ProxyError> {
        self.check_up()?;
        self.record("list".into());
        Ok(self.active.lock().unwrap().clone())
    }

    async fn delete_identity(&self, identity_id: &str) -> Result<(), ProxyError> {
        self.check_up()?;
        self.record(format!("delete {identity_id}"));
        if self.fail_delete.lock().unwrap().contains(identity_id) {
            return Err(ProxyError::Status {
                status: 500,
                body: "stuck".into(),
            });
        }
        self.active
            .lock()
            .unwrap()
            .retain(|a| a.identity_id != identity_id);
        Ok(())
    }
}

struct Harness {
    _tmp: TempDir,
    store: Arc<VaultStore>,
    proxy: Arc<RecordingProxy>,
    service: VaultService,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(VaultStore::new(
            tmp.path().join("vault.enc"),
            KdfParams::with_iterations(1_000),
        ));
        let proxy = Arc::new(RecordingProxy::default());
        let session = Arc::new(Session::new(store.clone(), proxy.clone()));
        Self {
            _tmp: tmp,
            store,
            proxy,
            service: VaultService::new(session, 8),
        }
    }

    fn session(&self) -> &Session {
        self.service.session()
    }

    /// Seed the vault directly, bypassing the session.
    async fn seed(&self, ids: &[&str]) {
        for id in ids {
            self.store
                .add_identity(
                    IdentityCandidate {
                        id_string: Some(id.to_string()),
                        name: Some(format!("{id} name")),
                        credential: json!({ "id": id }),
                        file_name: None,
                    },
                    &password(),
                )
                .await
                .unwrap();
        }
    }

    async fn unlocked_with(ids: &[&str]) -> Self {
        let h = Self::new();
        h.seed(ids).await;
        h.service.unlock_vault(password()).await.unwrap();
        h
    }
}

fn password() -> SecretString {
    SecretString::from(PASSWORD)
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ── State machine ─────────────────────────────────────────────────────────

#[tokio::test]
async fn state_transitions_through_a_session() {
    let h = Harness::new();
    assert_eq!(h.session().determine_initial_state().await.tag, StateTag::NoVault);

    h.seed(&["alpha"]).await;
    let state = h.session().determine_initial_state().await;
    assert_eq!(state.tag, StateTag::NeedsPassword);
    assert!(state.error.is_none());

    let unlocked = h.service.unlock_vault(password()).await.unwrap();
    assert_eq!(unlocked.tag, StateTag::UnlockedListed);
    assert_eq!(unlocked.identities.len(), 1);
    assert_eq!(
        h.session().determine_initial_state().await.tag,
        StateTag::UnlockedListed
    );

    h.service.login_selected(&ids(&["alpha"])).await.unwrap();
    assert_eq!(h.session().determine_initial_state().await.tag, StateTag::LoggedIn);

    let report = h.service.logout().await;
    assert!(report.is_clean());
    assert_eq!(report.deactivated, ids(&["zid-1"]));
    assert_eq!(
        h.session().determine_initial_state().await.tag,
        StateTag::NeedsPassword
    );
    assert!(h.session().active_ids().await.is_empty());
}

#[tokio::test]
async fn empty_vault_unlocks_as_vault_empty() {
    let h = Harness::new();
    h.store.write_all(&Vault::default(), &password()).await.unwrap();

    let unlocked = h.service.unlock_vault(password()).await.unwrap();
    assert_eq!(unlocked.tag, StateTag::UnlockedEmpty);
    assert_eq!(unlocked.tag.as_str(), "vault-empty");
}

#[tokio::test]
async fn wrong_password_caches_nothing() {
    let h = Harness::new();
    h.seed(&["alpha"]).await;

    let err = h
        .service
        .unlock_vault(SecretString::from("wrongpassword"))
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::WrongPasswordOrCorrupt));
    assert!(!h.session().is_unlocked().await);
}

#[tokio::test]
async fn empty_password_is_rejected() {
    let h = Harness::new();
    h.seed(&["alpha"]).await;

    let err = h.service.unlock_vault(SecretString::from("")).await.unwrap_err();
    assert!(matches!(err, VaultError::Validation(_)));
}

#[tokio::test]
async fn unlock_without_vault_is_vault_missing() {
    let h = Harness::new();
    let err = h.service.unlock_vault(password()).await.unwrap_err();
    assert!(matches!(err, VaultError::VaultMissing));
}

#[tokio::test]
async fn stale_cached_password_forces_needs_password() {
    let h = Harness::unlocked_with(&["alpha"]).await;

    // vault re-sealed elsewhere under a different password
    let vault = h.store.read_all(&password()).await.unwrap();
    h.store
        .write_all(&vault, &SecretString::from("another-password"))
        .await
        .unwrap();

    let state = h.session().determine_initial_state().await;
    assert_eq!(state.tag, StateTag::NeedsPassword);
    assert!(state.error.unwrap().contains("wrong password"));
    assert!(!h.session().is_unlocked().await);
}

// ── Activation gateway ────────────────────────────────────────────────────

#[tokio::test]
async fn login_requires_unlock() {
    let h = Harness::new();
    h.seed(&["alpha"]).await;

    let err = h.service.login_selected(&ids(&["alpha"])).await.unwrap_err();
    assert!(matches!(err, VaultError::VaultLocked));
    assert!(h.proxy.calls().is_empty());
}

#[tokio::test]
async fn login_with_missing_id_pushes_nothing() {
    let h = Harness::unlocked_with(&["a"]).await;

    let err = h
        .service
        .login_selected(&ids(&["a", "missing"]))
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::IdentityNotFound(ref id) if id == "missing"));
    assert!(h.proxy.calls().is_empty());
    assert!(h.session().active_ids().await.is_empty());
}

#[tokio::test]
async fn login_with_empty_selection_is_validation() {
    let h = Harness::unlocked_with(&["a"]).await;
    let err = h.service.login_selected(&[]).await.unwrap_err();
    assert!(matches!(err, VaultError::Validation(_)));
}

#[tokio::test]
async fn login_pushes_in_requested_order() {
    let h = Harness::unlocked_with(&["a", "b", "c"]).await;

    let outcome = h.service.login_selected(&ids(&["c", "a"])).await.unwrap();
    assert_eq!(outcome.activated_names, ["c name", "a name"]);
    assert_eq!(
        h.proxy.calls(),
        ["list", "push c", "list", "push a", "list"]
    );
    assert_eq!(h.session().active_ids().await, ids(&["a", "c"]));
    assert_eq!(h.session().proxy_id_for("c").await.as_deref(), Some("zid-1"));
    assert_eq!(h.session().proxy_id_for("a").await.as_deref(), Some("zid-2"));
}

#[tokio::test]
async fn failed_push_keeps_earlier_activations() {
    let h = Harness::unlocked_with(&["a", "b", "c"]).await;
    h.proxy.fail_push.lock().unwrap().insert("b".into());

    let err = h
        .service
        .login_selected(&ids(&["a", "b", "c"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VaultError::Proxy(ProxyError::Status { status: 400, .. })
    ));
    assert_eq!(h.proxy.calls(), ["list", "push a", "list", "push b"]);
    assert_eq!(h.session().active_ids().await, ids(&["a"]));
}

#[tokio::test]
async fn logout_continues_past_failed_delete() {
    let h = Harness::unlocked_with(&["x"]).await;
    h.proxy.set_active(&["x", "stuck", "y"]);
    h.proxy.fail_delete.lock().unwrap().insert("stuck".into());

    let report = h.service.logout().await;
    assert_eq!(report.deactivated, ids(&["x", "y"]));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "stuck");
    assert_eq!(
        h.proxy.calls(),
        ["list", "delete x", "delete stuck", "delete y"]
    );
    assert!(!h.session().is_unlocked().await);
}

#[tokio::test]
async fn logout_with_proxy_down_still_clears_session() {
    let h = Harness::unlocked_with(&["a"]).await;
    h.service.login_selected(&ids(&["a"])).await.unwrap();
    *h.proxy.down.lock().unwrap() = true;

    let report = h.service.logout().await;
    assert!(report.listing_error.unwrap().contains("not running"));
    assert!(!h.session().is_unlocked().await);
    assert!(h.session().active_ids().await.is_empty());
}

#[tokio::test]
async fn active_identities_reconciles_local_set() {
    let h = Harness::unlocked_with(&["a", "b"]).await;
    h.service.login_selected(&ids(&["a", "b"])).await.unwrap();

    // proxy restarted and only kept "a"
    h.proxy.forget_named("b");
    let reported = h.service.active_identities().await.unwrap();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].identity_id, "zid-1");
    assert_eq!(h.session().active_ids().await, ids(&["a"]));
}

#[tokio::test]
async fn listing_active_identities_keeps_logged_in_state() {
    let h = Harness::unlocked_with(&["a"]).await;
    h.service.login_selected(&ids(&["a"])).await.unwrap();
    assert_eq!(h.session().determine_initial_state().await.tag, StateTag::LoggedIn);

    let reported = h.service.active_identities().await.unwrap();
    assert_eq!(reported.len(), 1);
    assert_ne!(reported[0].identity_id, "a", "proxy ids are its own");

    assert_eq!(h.session().determine_initial_state().await.tag, StateTag::LoggedIn);
    assert_eq!(h.session().active_ids().await, ids(&["a"]));
}

#[tokio::test]
async fn deactivate_removes_from_active_set() {
    let h = Harness::unlocked_with(&["a", "b"]).await;
    h.service.login_selected(&ids(&["a", "b"])).await.unwrap();

    h.service.deactivate("zid-1").await.unwrap();
    assert_eq!(h.session().active_ids().await, ids(&["b"]));
    assert!(h.proxy.calls().contains(&"delete zid-1".to_string()));

    // by vault id, translated to the proxy id learned at login
    h.service.deactivate("b").await.unwrap();
    assert!(h.proxy.calls().contains(&"delete zid-2".to_string()));
    assert!(h.session().active_ids().await.is_empty());
}

#[tokio::test]
async fn health_reports_proxy_down() {
    let h = Harness::new();
    assert!(h.service.proxy_health().await.is_up());

    *h.proxy.down.lock().unwrap() = true;
    assert!(matches!(h.service.proxy_health().await, ProxyHealth::NotRunning));
}

// ── Enrollment and upload ─────────────────────────────────────────────────

#[tokio::test]
async fn enrollment_stores_credential_and_unlocks() {
    let h = Harness::new();
    let mut events = h.service.subscribe();

    let record = h
        .service
        .handle_enrollment(EnrollmentRequest {
            jwt_content: "aaa.bbb.ccc\n".into(),
            file_name: Some("laptop.jwt".into()),
            name: None,
            password: password(),
        })
        .await
        .unwrap();

    assert_eq!(record.id_string, "laptop");
    assert_eq!(record.credential["ztAPI"], "https://ctrl.example:1280");
    assert_eq!(h.proxy.calls(), ["enroll aaa.bbb.ccc"]);
    assert!(h.session().is_unlocked().await);
    assert_eq!(
        events.recv().await.unwrap(),
        VaultEvent::IdentityAdded {
            id_string: "laptop".into()
        }
    );
}

#[tokio::test]
async fn enrollment_rejects_short_password_before_proxy() {
    let h = Harness::new();

    let err = h
        .service
        .handle_enrollment(EnrollmentRequest {
            jwt_content: "aaa.bbb.ccc".into(),
            file_name: None,
            name: None,
            password: SecretString::from("short"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Validation(_)));
    assert!(h.proxy.calls().is_empty());
    assert!(!h.store.exists());
}

#[tokio::test]
async fn enrollment_rejects_malformed_token() {
    let h = Harness::new();

    let err = h
        .service
        .handle_enrollment(EnrollmentRequest {
            jwt_content: "not-a-jwt".into(),
            file_name: None,
            name: None,
            password: password(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Validation(_)));
    assert!(h.proxy.calls().is_empty());
}

#[tokio::test]
async fn enrollment_with_wrong_vault_password_spends_no_token() {
    let h = Harness::new();
    h.seed(&["existing"]).await;

    let err = h
        .service
        .handle_enrollment(EnrollmentRequest {
            jwt_content: "aaa.bbb.ccc".into(),
            file_name: Some("new.jwt".into()),
            name: None,
            password: SecretString::from("wrongpassword"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::WrongPasswordOrCorrupt));
    assert!(h.proxy.calls().is_empty());
}

#[tokio::test]
async fn enrollment_with_proxy_down_reports_not_running() {
    let h = Harness::new();
    *h.proxy.down.lock().unwrap() = true;

    let err = h
        .service
        .handle_enrollment(EnrollmentRequest {
            jwt_content: "aaa.bbb.ccc".into(),
            file_name: None,
            name: None,
            password: password(),
        })
        .await
        .unwrap_err();
    assert!(err.is_proxy_down());
    assert!(!h.store.exists());
}

#[tokio::test]
async fn upload_accepts_base64_and_rejects_duplicates() {
    let h = Harness::new();
    let file = STANDARD.encode(br#"{"id": "ops", "name": "Ops Admin"}"#);

    let upload = || UploadRequest {
        identity_file: file.clone().into_bytes(),
        file_name: Some("ops.json".into()),
        name: None,
        password: password(),
    };

    let record = h.service.handle_identity_upload(upload()).await.unwrap();
    assert_eq!(record.id_string, "ops");
    assert_eq!(record.name, "Ops Admin");

    let err = h.service.handle_identity_upload(upload()).await.unwrap_err();
    assert!(matches!(err, VaultError::DuplicateIdString(ref id) if id == "ops"));
    assert_eq!(h.service.get_vault_identities().await.unwrap().len(), 1);
}

#[tokio::test]
async fn upload_rejects_non_object() {
    let h = Harness::new();

    let err = h
        .service
        .handle_identity_upload(UploadRequest {
            identity_file: b"[\"not\", \"an\", \"identity\"]".to_vec(),
            file_name: None,
            name: None,
            password: password(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Validation(_)));
    assert!(!h.store.exists());
}

#[tokio::test]
async fn remove_reports_remaining_count() {
    let h = Harness::unlocked_with(&["a", "b"]).await;
    let mut events = h.service.subscribe();

    let removal = h
        .service
        .remove_identity_from_vault("a", password())
        .await
        .unwrap();
    assert_eq!(removal.remaining_count, 1);

    let err = h
        .service
        .remove_identity_from_vault("ghost", password())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VaultError::NotFound {
            remaining_count: 1,
            ..
        }
    ));
    assert_eq!(
        events.recv().await.unwrap(),
        VaultEvent::IdentityRemoved {
            id_string: "a".into(),
            remaining: 1
        }
    );
}
