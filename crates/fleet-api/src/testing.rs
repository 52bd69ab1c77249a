//! Helpers shared by the handler and router tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use fleet_cluster::ControlPlane;
use fleet_state::*;
use fleet_tools::ScriptedTools;
use serde_json::Value;

use crate::ApiState;

pub(crate) fn test_control(tools: ScriptedTools) -> ControlPlane {
    let store = StateStore::open_in_memory().unwrap();
    ControlPlane::new(store, Arc::new(tools))
}

pub(crate) fn test_state() -> ApiState {
    ApiState {
        control: test_control(ScriptedTools::new()),
    }
}

/// Seed a group, a member of it, an admin and a cluster the group owns.
pub(crate) fn seed(control: &ControlPlane) {
    let store = control.store();
    store
        .put_group(&Group {
            id: "group_physics".into(),
            name: "physics".into(),
            email: "physics@example.org".into(),
        })
        .unwrap();
    store
        .put_group(&Group {
            id: "group_chemistry".into(),
            name: "chemistry".into(),
            email: "chemistry@example.org".into(),
        })
        .unwrap();
    for (name, admin) in [("owner", false), ("admin", true), ("outsider", false)] {
        store
            .put_user(&User {
                id: format!("user_{name}"),
                name: name.into(),
                email: format!("{name}@example.org"),
                token: format!("token-{name}"),
                admin,
            })
            .unwrap();
    }
    store.add_user_to_group("user_owner", "group_physics").unwrap();
    store
        .add_cluster(&Cluster {
            id: "cluster_umich".into(),
            name: "umich".into(),
            owning_group: "group_physics".into(),
            owning_organization: "Example University".into(),
            config: "apiVersion: v1\nkind: Config\n".into(),
            system_namespace: "fleet-system".into(),
            valid: true,
        })
        .unwrap();
}

pub(crate) fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub(crate) async fn body_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
