//! Credential provisioning
//!
//! Every cluster has three credential roles, each stored in its own secret
//! named `<cluster><suffix>`. Roles are provisioned independently: a failure
//! in one role is logged and the others are still attempted, and the caller
//! receives both the passwords computed so far and every failure.
//!
//! An existing secret is never overwritten; its stored password is reused.

use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use crate::client::{KubeClient, ResourceKind};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::patch::{PatchPlan, paths};
use crate::crd::{PRIMARY_SECRET_SUFFIX, Pgcluster, ROOT_SECRET_SUFFIX, USER_SECRET_SUFFIX};
use crate::resources::secret::{
    PASSWORD_KEY, build_credential_secret, generate_password, secret_value,
};

/// One of the three credential roles of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRole {
    /// Database superuser
    Root,
    /// Replication user
    Primary,
    /// Application user
    User,
}

impl CredentialRole {
    pub const ALL: [CredentialRole; 3] = [
        CredentialRole::Root,
        CredentialRole::Primary,
        CredentialRole::User,
    ];

    pub fn username(&self) -> &'static str {
        match self {
            CredentialRole::Root => "postgres",
            CredentialRole::Primary => "primaryuser",
            CredentialRole::User => "testuser",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            CredentialRole::Root => ROOT_SECRET_SUFFIX,
            CredentialRole::Primary => PRIMARY_SECRET_SUFFIX,
            CredentialRole::User => USER_SECRET_SUFFIX,
        }
    }

    /// Cluster field recording the role's secret name
    pub fn secret_name_path(&self) -> &'static str {
        match self {
            CredentialRole::Root => paths::ROOT_SECRET_NAME,
            CredentialRole::Primary => paths::PRIMARY_SECRET_NAME,
            CredentialRole::User => paths::USER_SECRET_NAME,
        }
    }

    pub fn secret_name(&self, cluster_name: &str) -> String {
        format!("{}{}", cluster_name, self.suffix())
    }
}

/// Passwords of the three roles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub root: String,
    pub primary: String,
    pub user: String,
}

impl Credentials {
    pub fn get(&self, role: CredentialRole) -> &str {
        match role {
            CredentialRole::Root => &self.root,
            CredentialRole::Primary => &self.primary,
            CredentialRole::User => &self.user,
        }
    }

    fn set(&mut self, role: CredentialRole, password: String) {
        match role {
            CredentialRole::Root => self.root = password,
            CredentialRole::Primary => self.primary = password,
            CredentialRole::User => self.user = password,
        }
    }

    /// Caller-supplied passwords recorded on the cluster
    pub fn supplied(cluster: &Pgcluster) -> Self {
        Self {
            root: cluster.spec.root_password.clone(),
            primary: cluster.spec.primary_password.clone(),
            user: cluster.spec.password.clone(),
        }
    }
}

/// Result of [`provision_secrets`]
#[derive(Debug, Default)]
pub struct SecretsOutcome {
    /// Passwords computed so far, empty for roles that could not be resolved
    pub credentials: Credentials,
    pub failures: Vec<(CredentialRole, Error)>,
}

impl SecretsOutcome {
    /// Fail with the first role failure, if any
    pub fn into_result(self) -> Result<Credentials> {
        match self.failures.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(self.credentials),
        }
    }
}

/// Create (or reuse) the three credential secrets of `cluster` and record
/// their names on the cluster resource.
///
/// Passwords are taken from the cluster's supplied values, falling back to a
/// generated one.
#[instrument(skip(ctx, cluster), fields(name = %cluster.name_any(), namespace = %ns))]
pub async fn provision_secrets(ctx: &Context, cluster: &Pgcluster, ns: &str) -> SecretsOutcome {
    let cluster_name = cluster.name_any();
    let supplied = Credentials::supplied(cluster);
    let mut outcome = SecretsOutcome::default();
    let mut plan = PatchPlan::new(ResourceKind::Pgcluster, &cluster_name);
    let mut planned = Vec::new();

    for role in CredentialRole::ALL {
        let secret_name = role.secret_name(&cluster_name);
        let (password, result) = provision_role(
            ctx.kube.as_ref(),
            role,
            &cluster_name,
            &secret_name,
            supplied.get(role),
            ctx.config.cluster.password_length,
            ns,
        )
        .await;
        outcome.credentials.set(role, password);

        match result {
            Ok(()) => {
                plan = plan.set(role.secret_name_path(), secret_name);
                planned.push(role);
            }
            Err(e) => {
                error!("error creating secret {}: {}", secret_name, e);
                outcome.failures.push((role, e));
            }
        }
    }

    let report = plan.apply(ctx.kube.as_ref(), ns).await;
    for (path, e) in report.failed {
        if let Some(role) = planned.iter().find(|r| r.secret_name_path() == path) {
            outcome.failures.push((*role, e));
        }
    }
    outcome
}

/// Resolve one role's password and make sure its secret exists
async fn provision_role(
    kube: &dyn KubeClient,
    role: CredentialRole,
    cluster_name: &str,
    secret_name: &str,
    supplied: &str,
    password_length: usize,
    ns: &str,
) -> (String, Result<()>) {
    let existing = match kube.get_secret(secret_name, ns).await {
        Ok(existing) => existing,
        Err(e) => return (supplied.to_string(), Err(e)),
    };

    if let Some(secret) = existing {
        debug!("secret {} already exists, reusing its password", secret_name);
        return match secret_value(&secret, PASSWORD_KEY) {
            Some(password) => (password, Ok(())),
            None => (
                String::new(),
                Err(Error::SecretContentError(secret_name.to_string())),
            ),
        };
    }

    let password = if supplied.is_empty() {
        generate_password(password_length)
    } else {
        supplied.to_string()
    };
    let secret = build_credential_secret(cluster_name, secret_name, role.username(), &password);
    match kube.create_secret(ns, &secret).await {
        Ok(()) => {
            info!("created secret {}", secret_name);
            (password, Ok(()))
        }
        Err(e) => (password, Err(e)),
    }
}

/// Read the three role passwords from another cluster's secrets.
///
/// Any missing secret or unreadable password fails the whole lookup.
pub async fn credentials_from(kube: &dyn KubeClient, source: &str, ns: &str) -> Result<Credentials> {
    let mut credentials = Credentials::default();
    for role in CredentialRole::ALL {
        let secret_name = role.secret_name(source);
        let secret = kube
            .get_secret(&secret_name, ns)
            .await?
            .ok_or_else(|| Error::NotFound(format!("secret {}", secret_name)))?;
        let password = secret_value(&secret, PASSWORD_KEY)
            .ok_or_else(|| Error::SecretContentError(secret_name.clone()))?;
        credentials.set(role, password);
    }
    Ok(credentials)
}
