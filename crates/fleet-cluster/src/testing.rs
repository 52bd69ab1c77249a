//! Shared fixtures for the workflow tests.

use std::sync::Arc;
use std::time::Duration;

use fleet_state::*;
use fleet_tools::{ScriptedTools, Tool, ToolOutput};

use crate::control::ControlPlane;
use crate::registration::RegistrationTimings;

pub(crate) const SYSTEM_NAMESPACE: &str = "fleet-system";

pub(crate) fn kubeconfig(namespace: &str) -> String {
    format!(
        "apiVersion: v1\nkind: Config\nclusters:\n- cluster:\n    server: https://10.0.0.1:6443\n  name: c\n\
         contexts:\n- context:\n    cluster: c\n    namespace: {namespace}\n    user: {namespace}\n  name: {namespace}\n\
         current-context: {namespace}\n"
    )
}

/// Tools that answer the reachability probe.
pub(crate) fn reachable_tools(namespace: &str) -> ScriptedTools {
    ScriptedTools::new().on(
        Tool::Kubectl,
        &["get", "serviceaccounts"],
        ToolOutput::ok(format!("default {namespace}")),
    )
}

/// Tools scripted for a registration that passes every step.
pub(crate) fn healthy_tools(namespace: &str) -> ScriptedTools {
    reachable_tools(namespace)
        .on(
            Tool::Kubectl,
            &["describe", "serviceaccount"],
            ToolOutput::ok(format!(
                "Name:                {namespace}\nNamespace:           {namespace}\nLabels:              <none>\n"
            )),
        )
        .on(
            Tool::Helm,
            &["init"],
            ToolOutput::ok("$HELM_HOME has been configured.\n\nTiller (the Helm server-side component) has been installed into your Kubernetes Cluster.\n"),
        )
        .on(
            Tool::Kubectl,
            &["get", "pods"],
            ToolOutput::ok("NAME                             READY   STATUS    RESTARTS   AGE\ntiller-deploy-5c688d5f9b-abcde   1/1     Running   0          1m\n"),
        )
}

pub(crate) fn fast_timings() -> RegistrationTimings {
    RegistrationTimings {
        poll_interval: Duration::from_millis(1),
        readiness_timeout: Duration::from_millis(30),
    }
}

pub(crate) struct Fixture {
    pub store: StateStore,
    pub tools: Arc<ScriptedTools>,
    pub control: ControlPlane,
    pub owner_group: Group,
    pub other_group: Group,
    /// Member of `owner_group`.
    pub owner: User,
    pub admin: User,
    /// Member of no group.
    pub outsider: User,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_tools(ScriptedTools::new())
    }

    pub fn with_tools(tools: ScriptedTools) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let tools = Arc::new(tools);
        let control = ControlPlane::new(store.clone(), tools.clone()).with_timings(fast_timings());

        let owner_group = Group {
            id: "group_physics".to_string(),
            name: "physics".to_string(),
            email: "physics@example.org".to_string(),
        };
        let other_group = Group {
            id: "group_chemistry".to_string(),
            name: "chemistry".to_string(),
            email: "chemistry@example.org".to_string(),
        };
        store.put_group(&owner_group).unwrap();
        store.put_group(&other_group).unwrap();

        let mut fx = Self {
            store,
            tools,
            control,
            owner_group,
            other_group,
            owner: dummy_user(),
            admin: dummy_user(),
            outsider: dummy_user(),
        };
        fx.owner = fx.user("owner", false);
        fx.admin = fx.user("admin", true);
        fx.outsider = fx.user("outsider", false);
        fx.store
            .add_user_to_group(&fx.owner.id, &fx.owner_group.id)
            .unwrap();
        fx
    }

    pub fn user(&self, name: &str, admin: bool) -> User {
        let user = User {
            id: format!("user_{name}"),
            name: name.to_string(),
            email: format!("{name}@example.org"),
            token: format!("token-{name}"),
            admin,
        };
        self.store.put_user(&user).unwrap();
        user
    }

    /// Insert a cluster owned by `owner_group` without going through registration.
    pub fn cluster(&self, name: &str) -> Cluster {
        let cluster = Cluster {
            id: format!("cluster_{name}"),
            name: name.to_string(),
            owning_group: self.owner_group.id.clone(),
            owning_organization: "Example University".to_string(),
            config: kubeconfig(SYSTEM_NAMESPACE),
            system_namespace: SYSTEM_NAMESPACE.to_string(),
            valid: true,
        };
        assert!(self.store.add_cluster(&cluster).unwrap());
        cluster
    }

    pub fn instance(&self, cluster: &Cluster, name: &str) -> ApplicationInstance {
        let instance = ApplicationInstance {
            id: format!("instance_{name}"),
            name: name.to_string(),
            application: "nginx".to_string(),
            owning_group: self.owner_group.id.clone(),
            cluster: cluster.id.clone(),
            created: timestamp(),
            configuration: String::new(),
        };
        self.store.put_instance(&instance).unwrap();
        instance
    }

    pub fn secret(&self, cluster: &Cluster, name: &str) -> Secret {
        let secret = Secret {
            id: format!("secret_{name}"),
            name: name.to_string(),
            group: self.owner_group.id.clone(),
            cluster: cluster.id.clone(),
            created: timestamp(),
            contents: [("password".to_string(), "hunter2".to_string())].into(),
        };
        self.store.put_secret(&secret).unwrap();
        secret
    }
}

fn dummy_user() -> User {
    User {
        id: String::new(),
        name: String::new(),
        email: String::new(),
        token: String::new(),
        admin: false,
    }
}
