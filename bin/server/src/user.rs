//! User routes: sign-up, lookup and the caller's own permissions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashgate_authz::{Action, GLOBAL_PROJECT, Permission};
use dashgate_core::Kind;
use dashgate_identity::{NewNativeUser, PublicUser};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use crate::auth::{AppState, Caller, allow_anonymous, require_auth};
use crate::error::ApiError;

pub const USERS_PATH: &str = "/api/v1/users";

/// User routes, with their authentication layers bound to `state`.
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let authenticated = Router::new()
        .route("/api/v1/users/me/permissions", get(my_permissions))
        .route("/api/v1/users/{login}", get(get_user))
        .route_layer(from_fn_with_state(state.clone(), require_auth));
    let open = Router::new()
        .route(USERS_PATH, post(create_user))
        .route_layer(from_fn_with_state(state, allow_anonymous));
    authenticated.merge(open)
}

#[derive(Debug, Default, Deserialize)]
struct CreateUserRequest {
    #[serde(default)]
    login: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

/// Creates a native account.
///
/// With sign-up disabled only callers allowed to create users get through.
#[instrument(skip_all, fields(login = %request.login))]
async fn create_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<PublicUser>, ApiError> {
    if state.disable_sign_up {
        state
            .check_permission(&caller, Action::Create, Kind::User, "")
            .await?;
    }
    let user = state
        .native
        .create(NewNativeUser {
            login: request.login,
            password: request.password,
            first_name: request.first_name,
            last_name: request.last_name,
        })
        .await?;
    Ok(Json(user.to_public()))
}

/// Reads a user. Callers may always read themselves; anyone else without
/// read access on users gets the same 404 as for a missing login. Failures
/// of the role store are reported as such.
async fn get_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(login): Path<String>,
) -> Result<Json<PublicUser>, ApiError> {
    let not_found = || ApiError::not_found(format!("user '{}' not found", login));
    let is_self = !caller.anonymous && caller.login == login;
    if !is_self {
        match state
            .check_permission(&caller, Action::Read, Kind::User, "")
            .await
        {
            Ok(()) => {}
            Err(e) if e.status() == StatusCode::UNAUTHORIZED => return Err(not_found()),
            Err(e) => return Err(e),
        }
    }
    let user = state
        .users
        .get(&login)
        .await
        .map_err(ApiError::from_error)?
        .ok_or_else(not_found)?;
    Ok(Json(user.to_public()))
}

/// Permissions of the caller keyed by project, `*` holding the global ones.
async fn my_permissions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<BTreeMap<String, Vec<Permission>>>, ApiError> {
    if caller.anonymous {
        let guest = state.rbac.guest_permissions().to_vec();
        return Ok(Json(BTreeMap::from([(GLOBAL_PROJECT.to_string(), guest)])));
    }
    let permissions = state.rbac.user_permissions(&caller.login).await?;
    Ok(Json(permissions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{state, state_with};
    use crate::test_support::json_body;
    use axum::body::Body;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use async_trait::async_trait;
    use axum::http::Request;
    use axum::response::Response;
    use dashgate_authz::{
        AuthzError, GlobalRole, GlobalRoleBinding, MemoryRbacStore, RbacStore, Role, RoleBinding,
        Scope, Subject,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response {
        routes(state.clone())
            .with_state(state.clone())
            .oneshot(request)
            .await
            .expect("response")
    }

    fn sign_up(body: Value, token: Option<&str>) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri(USERS_PATH)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        request
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get_as(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .expect("request")
    }

    /// Role store whose backend is down.
    struct UnreachableRbac;

    fn unreachable() -> AuthzError {
        AuthzError::Store {
            details: "connection refused".to_string(),
        }
    }

    #[async_trait]
    impl RbacStore for UnreachableRbac {
        async fn role(&self, _project: &str, _name: &str) -> Result<Option<Role>, AuthzError> {
            Err(unreachable())
        }

        async fn role_bindings(
            &self,
            _project: Option<&str>,
        ) -> Result<Vec<RoleBinding>, AuthzError> {
            Err(unreachable())
        }

        async fn global_role(&self, _name: &str) -> Result<Option<GlobalRole>, AuthzError> {
            Err(unreachable())
        }

        async fn global_role_bindings(&self) -> Result<Vec<GlobalRoleBinding>, AuthzError> {
            Err(unreachable())
        }
    }

    async fn admin_state() -> Arc<AppState> {
        let rbac = Arc::new(MemoryRbacStore::new());
        rbac.put_global_role(GlobalRole {
            name: "admin".to_string(),
            permissions: vec![Permission::new([Action::Wildcard], [Scope::Wildcard])],
        })
        .await;
        rbac.put_global_role_binding(GlobalRoleBinding {
            name: "admins".to_string(),
            role: "admin".to_string(),
            subjects: vec![Subject::user("root")],
        })
        .await;
        Arc::new(state_with(rbac, Vec::new()))
    }

    #[tokio::test]
    async fn anonymous_sign_up_hides_the_password() {
        let state = Arc::new(state());
        let response = send(
            &state,
            sign_up(json!({ "login": "alice", "password": "secret" }), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["login"], "alice");
        assert_eq!(body["native"], true);
        assert!(body.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn duplicate_sign_up_conflicts() {
        let state = Arc::new(state());
        let body = json!({ "login": "alice", "password": "secret" });
        send(&state, sign_up(body.clone(), None)).await;
        let response = send(&state, sign_up(body, None)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn disabled_sign_up_needs_create_permission() {
        let mut inner = Arc::into_inner(admin_state().await).expect("sole owner");
        inner.disable_sign_up = true;
        let state = Arc::new(inner);

        let body = json!({ "login": "bob", "password": "secret" });
        let response = send(&state, sign_up(body.clone(), None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let token = state.tokens.issue_access("root").expect("issue");
        let response = send(&state, sign_up(body, Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn users_read_themselves_but_not_others() {
        let state = Arc::new(state());
        for login in ["alice", "bob"] {
            send(
                &state,
                sign_up(json!({ "login": login, "password": "secret" }), None),
            )
            .await;
        }
        let token = state.tokens.issue_access("alice").expect("issue");

        let response = send(&state, get_as("/api/v1/users/alice", &token)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let hidden = send(&state, get_as("/api/v1/users/bob", &token)).await;
        let missing = send(&state, get_as("/api/v1/users/carol", &token)).await;
        assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn role_store_failure_is_not_a_missing_user() {
        let state = Arc::new(state_with(Arc::new(UnreachableRbac), Vec::new()));
        send(
            &state,
            sign_up(json!({ "login": "bob", "password": "secret" }), None),
        )
        .await;
        let token = state.tokens.issue_access("alice").expect("issue");

        let response = send(&state, get_as("/api/v1/users/bob", &token)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let own = send(&state, get_as("/api/v1/users/alice", &token)).await;
        assert_eq!(own.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn readers_see_other_users() {
        let state = admin_state().await;
        send(
            &state,
            sign_up(json!({ "login": "bob", "password": "secret" }), None),
        )
        .await;
        let token = state.tokens.issue_access("root").expect("issue");
        let response = send(&state, get_as("/api/v1/users/bob", &token)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn lookup_requires_a_token() {
        let state = Arc::new(state());
        let request = Request::builder()
            .uri("/api/v1/users/alice")
            .body(Body::empty())
            .expect("request");
        let response = send(&state, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn permissions_are_keyed_by_project() {
        let state = admin_state().await;
        let token = state.tokens.issue_access("root").expect("issue");
        let response = send(&state, get_as("/api/v1/users/me/permissions", &token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["*"][0]["actions"][0], "*");
    }

    #[tokio::test]
    async fn anonymous_permissions_are_the_guest_ones_when_auth_is_off() {
        let mut inner = state_with(
            Arc::new(MemoryRbacStore::new()),
            vec![Permission::new([Action::Read], [Scope::Wildcard])],
        );
        inner.enable_auth = false;
        let state = Arc::new(inner);
        let request = Request::builder()
            .uri("/api/v1/users/me/permissions")
            .body(Body::empty())
            .expect("request");
        let body = json_body(send(&state, request).await).await;
        assert_eq!(body["*"][0]["actions"][0], "read");
    }
}
