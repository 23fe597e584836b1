//! Desired-state project definition.
//!
//! Loaded once at process start and saved back at the end, carrying any
//! floating addresses allocated along the way. Only single-threaded
//! workflows mutate it; parallel work items receive clones.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::provider::{SecurityRule, Tags};
use crate::remote::Env;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("cannot read project file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse project file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot write project file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid project: {0}")]
    Invalid(String),
}

/// Wait budgets, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub create_network: u64,
    pub create_nat_gateway: u64,
    pub delete_nat_gateway: u64,
    pub create_instance: u64,
    pub delete_instance: u64,
    pub create_volume: u64,
    pub attach_volume: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create_network: 60,
            create_nat_gateway: 300,
            delete_nat_gateway: 300,
            create_instance: 300,
            delete_instance: 300,
            create_volume: 60,
            attach_volume: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrivateSubnetDef {
    pub name: String,
    pub cidr: String,
    pub availability_zone: String,
    pub route_table_to_nat_gateway_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicSubnetDef {
    pub name: String,
    pub cidr: String,
    pub availability_zone: String,
    pub nat_gateway_name: String,
    pub nat_gateway_external_ip_name: String,
    #[serde(default)]
    pub nat_gateway_public_ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterDef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkDef {
    pub name: String,
    pub cidr: String,
    pub private_subnet: PrivateSubnetDef,
    pub public_subnet: PublicSubnetDef,
    pub router: RouterDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityGroupDef {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshConfigDef {
    #[serde(default)]
    pub external_ip_address: String,
    pub bastion_external_ip_address_name: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub private_key_path: String,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceCommandsDef {
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub config: Vec<String>,
    #[serde(default)]
    pub start: Vec<String>,
    #[serde(default)]
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDef {
    #[serde(default)]
    pub env: Env,
    #[serde(default)]
    pub cmd: ServiceCommandsDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeDef {
    pub name: String,
    pub availability_zone: String,
    pub mount_point: String,
    pub size_gb: u32,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    pub device_name: String,
}

fn default_volume_type() -> String {
    "gp3".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubnetType {
    Public,
    #[default]
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceDef {
    pub purpose: String,
    pub hostname: String,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ip_address: Option<String>,
    pub flavor_name: String,
    pub image_name: String,
    pub root_key_name: String,
    pub security_group_name: String,
    #[serde(default)]
    pub subnet_type: SubnetType,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeDef>,
    #[serde(default)]
    pub service: ServiceDef,
}

impl InstanceDef {
    /// Address to reach the instance at: the external one when it has one.
    pub fn best_ip_address(&self) -> &str {
        match &self.external_ip_address {
            Some(ip) if !ip.is_empty() => ip,
            _ => &self.ip_address,
        }
    }
}

/// Purpose tag of the members of the database ring.
pub const PURPOSE_CASSANDRA: &str = "cassandra";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub deployment_name: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub timeouts: Timeouts,
    pub network: NetworkDef,
    #[serde(default)]
    pub security_groups: BTreeMap<String, SecurityGroupDef>,
    pub ssh_config: SshConfigDef,
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceDef>,
}

impl Project {
    pub fn from_json(path: &str, raw: &str) -> Result<Self, ProjectError> {
        let project: Project = serde_json::from_str(raw).map_err(|source| ProjectError::Parse {
            path: path.to_string(),
            source,
        })?;
        project.validate()?;
        Ok(project)
    }

    /// Load and validate a project file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ProjectError::Read {
                path: shown.clone(),
                source,
            })?;
        debug!(path = %shown, "Loaded project file");
        Self::from_json(&shown, &raw)
    }

    /// Write the project back, via a temp file and rename.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let write_err = |source| ProjectError::Write {
            path: shown.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
        debug!(path = %shown, "Saved project file");
        Ok(())
    }

    fn validate(&self) -> Result<(), ProjectError> {
        for (nickname, inst) in &self.instances {
            if !self
                .security_groups
                .values()
                .any(|sg| sg.name == inst.security_group_name)
            {
                return Err(ProjectError::Invalid(format!(
                    "instance {} references unknown security group {}",
                    nickname, inst.security_group_name
                )));
            }
        }
        Ok(())
    }

    pub fn set_ssh_external_ip(&mut self, ip: &str) {
        self.ssh_config.external_ip_address = ip.to_string();
    }

    pub fn set_nat_gateway_external_ip(&mut self, ip: &str) {
        self.network.public_subnet.nat_gateway_public_ip = ip.to_string();
    }

    /// Ring members in nickname order.
    pub fn instances_with_purpose(&self, purpose: &str) -> BTreeMap<String, &InstanceDef> {
        self.instances
            .iter()
            .filter(|(_, def)| def.purpose == purpose)
            .map(|(nick, def)| (nick.clone(), def))
            .collect()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "deployment_name": "sample",
        "tags": {"Deployment": "sample"},
        "network": {
            "name": "sample_vpc",
            "cidr": "10.5.0.0/16",
            "private_subnet": {
                "name": "sample_private",
                "cidr": "10.5.0.0/24",
                "availability_zone": "us-east-1c",
                "route_table_to_nat_gateway_name": "sample_private_rt"
            },
            "public_subnet": {
                "name": "sample_public",
                "cidr": "10.5.1.0/24",
                "availability_zone": "us-east-1c",
                "nat_gateway_name": "sample_natgw",
                "nat_gateway_external_ip_name": "sample_natgw_ip"
            },
            "router": {"name": "sample_router"}
        },
        "security_groups": {
            "bastion": {"name": "sample_bastion_sg", "rules": [
                {"protocol": "tcp", "port": 22, "remote_ip": "0.0.0.0/0"}
            ]},
            "internal": {"name": "sample_internal_sg"}
        },
        "ssh_config": {
            "bastion_external_ip_address_name": "sample_bastion_ip",
            "user": "ubuntu",
            "private_key_path": "~/.ssh/sample.pem"
        },
        "instances": {
            "bastion": {
                "purpose": "bastion", "hostname": "bastion", "ip_address": "10.5.1.10",
                "flavor_name": "t2.micro", "image_name": "ubuntu-22.04",
                "root_key_name": "sample-key", "security_group_name": "sample_bastion_sg",
                "subnet_type": "public"
            },
            "cass1": {
                "purpose": "cassandra", "hostname": "cass1", "ip_address": "10.5.0.11",
                "flavor_name": "c5.xlarge", "image_name": "ubuntu-22.04",
                "root_key_name": "sample-key", "security_group_name": "sample_internal_sg",
                "volumes": {"data": {"name": "cass1_data", "availability_zone": "us-east-1c",
                    "mount_point": "/data", "size_gb": 16, "device_name": "/dev/sdf"}}
            },
            "cass2": {
                "purpose": "cassandra", "hostname": "cass2", "ip_address": "10.5.0.12",
                "flavor_name": "c5.xlarge", "image_name": "ubuntu-22.04",
                "root_key_name": "sample-key", "security_group_name": "sample_internal_sg"
            }
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let prj = Project::from_json("sample.json", SAMPLE).unwrap();
        assert_eq!(prj.instances.len(), 3);
        assert_eq!(prj.timeouts, Timeouts::default());
        assert_eq!(prj.ssh_config.port, 22);
        let cass1 = &prj.instances["cass1"];
        assert_eq!(cass1.subnet_type, SubnetType::Private);
        assert_eq!(cass1.volumes["data"].volume_type, "gp3");
        assert_eq!(prj.instances_with_purpose(PURPOSE_CASSANDRA).len(), 2);
    }

    #[test]
    fn test_unknown_security_group_rejected() {
        let raw = SAMPLE.replace("\"security_group_name\": \"sample_bastion_sg\"", "\"security_group_name\": \"nope\"");
        let err = Project::from_json("sample.json", &raw).unwrap_err();
        assert!(matches!(err, ProjectError::Invalid(_)));
    }

    #[test]
    fn test_best_ip_address() {
        let prj = Project::from_json("sample.json", SAMPLE).unwrap();
        let mut bastion = prj.instances["bastion"].clone();
        assert_eq!(bastion.best_ip_address(), "10.5.1.10");
        bastion.external_ip_address = Some("54.1.2.3".into());
        assert_eq!(bastion.best_ip_address(), "54.1.2.3");
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prj.json");
        let mut prj = Project::from_json("sample.json", SAMPLE).unwrap();
        prj.set_nat_gateway_external_ip("3.3.3.3");
        prj.save(&path).await.unwrap();

        let reloaded = Project::load(&path).await.unwrap();
        assert_eq!(reloaded.network.public_subnet.nat_gateway_public_ip, "3.3.3.3");
        assert_eq!(reloaded, prj);
        assert!(!dir.path().join("prj.json.tmp").exists());
    }
}
