use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pgupgrade is a one-shot request to move a cluster to a new image.
///
/// The resource shares its name with the target cluster. Completion is
/// recorded on the cluster (`ccpimagetag`) and, for minor upgrades, in
/// `upgradestatus`; the operator never deletes it on success.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "pgcluster.crunchydata.com",
    version = "v1",
    kind = "Pgupgrade",
    plural = "pgupgrades",
    shortname = "pgu",
    namespaced,
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.upgradetype"}"#,
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.ccpimagetag"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".spec.upgradestatus"}"#
)]
pub struct PgupgradeSpec {
    /// Name of the cluster being upgraded
    #[serde(default)]
    pub name: String,

    /// `minor` or `major`
    #[serde(default, rename = "upgradetype")]
    pub upgrade_type: String,

    /// Target image tag
    #[serde(default, rename = "ccpimagetag")]
    pub ccp_image_tag: String,

    #[serde(default, rename = "oldpvcname")]
    pub old_pvc_name: String,

    #[serde(default, rename = "newpvcname")]
    pub new_pvc_name: String,

    #[serde(default, rename = "upgradestatus")]
    pub upgrade_status: String,
}

/// Parsed form of `upgradetype`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeType {
    Minor,
    Major,
}

impl std::str::FromStr for UpgradeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minor" => Ok(UpgradeType::Minor),
            "major" => Ok(UpgradeType::Major),
            other => Err(format!("invalid upgrade type '{}'", other)),
        }
    }
}

impl std::fmt::Display for UpgradeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradeType::Minor => write!(f, "minor"),
            UpgradeType::Major => write!(f, "major"),
        }
    }
}
