//! Shared test utilities for cloudrig-core integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cloudrig_core::dispatch::{Dispatcher, DispatcherConfig, OutputSink};
use cloudrig_core::error::DeployError;
use cloudrig_core::log::LogRecord;
use cloudrig_core::project::Project;
use cloudrig_core::provider::{
    Association, CloudProvider, CreateSpec, FloatingIp, LifecycleState, ProviderError,
    ProviderResult, ResourceIdentity, ResourceKind, RouteTarget, Tags,
};
use cloudrig_core::remote::{Env, ExecError, RemoteExecutor};
use cloudrig_core::workflow::DeployContext;

pub const PROJECT: &str = r#"{
    "deployment_name": "itest",
    "tags": {"Deployment": "itest"},
    "network": {
        "name": "itest_vpc",
        "cidr": "10.5.0.0/16",
        "private_subnet": {
            "name": "itest_private",
            "cidr": "10.5.0.0/24",
            "availability_zone": "us-east-1c",
            "route_table_to_nat_gateway_name": "itest_private_rt"
        },
        "public_subnet": {
            "name": "itest_public",
            "cidr": "10.5.1.0/24",
            "availability_zone": "us-east-1c",
            "nat_gateway_name": "itest_natgw",
            "nat_gateway_external_ip_name": "itest_natgw_ip"
        },
        "router": {"name": "itest_router"}
    },
    "security_groups": {
        "bastion": {"name": "itest_bastion_sg", "rules": [
            {"protocol": "tcp", "port": 22, "remote_ip": "0.0.0.0/0"}
        ]},
        "internal": {"name": "itest_internal_sg"}
    },
    "ssh_config": {
        "bastion_external_ip_address_name": "itest_bastion_ip",
        "user": "ubuntu",
        "private_key_path": "~/.ssh/itest.pem"
    },
    "instances": {
        "bastion": {
            "purpose": "bastion", "hostname": "itest-bastion", "ip_address": "10.5.1.10",
            "flavor_name": "t2.micro", "image_name": "ubuntu-22.04",
            "root_key_name": "itest-key", "security_group_name": "itest_bastion_sg",
            "subnet_type": "public"
        },
        "cass1": {
            "purpose": "cassandra", "hostname": "itest-cass1", "ip_address": "10.5.0.11",
            "flavor_name": "c5.xlarge", "image_name": "ubuntu-22.04",
            "root_key_name": "itest-key", "security_group_name": "itest_internal_sg",
            "volumes": {"data": {"name": "itest_cass1_data", "availability_zone": "us-east-1c",
                "mount_point": "/data", "size_gb": 16, "device_name": "/dev/sdf"}},
            "service": {"env": {"CLUSTER": "itest"},
                "cmd": {"start": ["start.sh"], "stop": ["stop.sh"], "config": ["config.sh"]}}
        },
        "cass2": {
            "purpose": "cassandra", "hostname": "itest-cass2", "ip_address": "10.5.0.12",
            "flavor_name": "c5.xlarge", "image_name": "ubuntu-22.04",
            "root_key_name": "itest-key", "security_group_name": "itest_internal_sg",
            "service": {"cmd": {"start": ["start.sh"], "stop": ["stop.sh"], "config": ["config.sh"]}}
        }
    }
}"#;

pub fn project() -> Project {
    Project::from_json("itest.json", PROJECT).unwrap()
}

#[derive(Debug, Clone)]
struct Object {
    kind: ResourceKind,
    name: String,
    /// The network's main route table, untagged until someone names it.
    main: bool,
    identity: ResourceIdentity,
}

#[derive(Debug, Clone)]
struct Address {
    name: String,
    ip: FloatingIp,
}

#[derive(Default)]
struct State {
    next_id: u64,
    objects: BTreeMap<String, Object>,
    addresses: Vec<Address>,
    calls: Vec<String>,
    unknown_flavors: Vec<String>,
}

impl State {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn name_of(&self, id: &str) -> String {
        self.objects
            .get(id)
            .filter(|o| !o.name.is_empty())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

fn prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::NatGateway => "nat",
        ResourceKind::RouteTable => "rtb",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::Instance => "i",
        ResourceKind::Volume => "vol",
        ResourceKind::FloatingIp => "eipalloc",
    }
}

/// In-memory provider that records every mutating call as
/// `"<verb> <kind> <name>"`.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<State>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Put an object in place as if someone else had created it.
    pub fn seed(&self, kind: ResourceKind, name: &str, identity: ResourceIdentity) {
        let mut st = self.state.lock().unwrap();
        st.objects.insert(
            identity.id.clone(),
            Object {
                kind,
                name: name.to_string(),
                main: false,
                identity,
            },
        );
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<ResourceIdentity> {
        let st = self.state.lock().unwrap();
        st.objects
            .values()
            .find(|o| o.kind == kind && o.name == name)
            .map(|o| o.identity.clone())
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        let st = self.state.lock().unwrap();
        st.objects.values().filter(|o| o.kind == kind && !o.main).count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded calls starting with one of `verbs`.
    pub fn calls_matching(&self, verbs: &[&str]) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| verbs.iter().any(|v| c.starts_with(&format!("{} ", v))))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn reject_flavor(&self, flavor: &str) {
        self.state.lock().unwrap().unknown_flavors.push(flavor.to_string());
    }

    /// Seed a main route table, as the provider creates one with each network.
    pub fn seed_main_table(&self, identity: ResourceIdentity) {
        let mut st = self.state.lock().unwrap();
        st.objects.insert(
            identity.id.clone(),
            Object {
                kind: ResourceKind::RouteTable,
                name: String::new(),
                main: true,
                identity,
            },
        );
    }

    pub fn seed_address(&self, name: &str, public_ip: &str) {
        let mut st = self.state.lock().unwrap();
        let allocation_id = st.next("eipalloc");
        st.addresses.push(Address {
            name: name.to_string(),
            ip: FloatingIp {
                public_ip: public_ip.to_string(),
                allocation_id,
                instance_id: None,
            },
        });
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    async fn find_by_name(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> ProviderResult<Option<ResourceIdentity>> {
        Ok(self.get(kind, name))
    }

    async fn describe(&self, kind: ResourceKind, id: &str) -> ProviderResult<Option<ResourceIdentity>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .objects
            .get(id)
            .filter(|o| o.kind == kind)
            .map(|o| o.identity.clone()))
    }

    async fn create(&self, spec: &CreateSpec, _tags: &Tags) -> ProviderResult<String> {
        let mut st = self.state.lock().unwrap();
        let kind = spec.kind();
        let id = st.next(prefix(kind));
        let identity = match spec {
            CreateSpec::Network { .. } => {
                let rtb = st.next("rtb");
                st.objects.insert(
                    rtb.clone(),
                    Object {
                        kind: ResourceKind::RouteTable,
                        name: String::new(),
                        main: true,
                        identity: ResourceIdentity::new(rtb, LifecycleState::Available)
                            .in_network(id.clone()),
                    },
                );
                ResourceIdentity::new(id.clone(), LifecycleState::Available)
            }
            CreateSpec::Subnet { network_id, .. }
            | CreateSpec::RouteTable { network_id, .. }
            | CreateSpec::SecurityGroup { network_id, .. } => {
                ResourceIdentity::new(id.clone(), LifecycleState::Available).in_network(network_id)
            }
            CreateSpec::InternetGateway { .. } => {
                ResourceIdentity::new(id.clone(), LifecycleState::Detached)
            }
            CreateSpec::NatGateway { subnet_id, .. } => {
                ResourceIdentity::new(id.clone(), LifecycleState::Available).in_subnet(subnet_id)
            }
            CreateSpec::Instance { subnet_id, .. } => {
                ResourceIdentity::new(id.clone(), LifecycleState::Running).in_subnet(subnet_id)
            }
            CreateSpec::Volume { .. } => ResourceIdentity::new(id.clone(), LifecycleState::Available),
        };
        st.calls.push(format!("create {} {}", kind, spec.name()));
        st.objects.insert(
            id.clone(),
            Object {
                kind,
                name: spec.name().to_string(),
                main: false,
                identity,
            },
        );
        Ok(id)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()> {
        let mut st = self.state.lock().unwrap();
        let name = st.name_of(id);
        st.calls.push(format!("delete {} {}", kind, name));
        match st.objects.remove(id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::new(format!("{} does not exist", id))),
        }
    }

    async fn tag(&self, id: &str, key: &str, value: &str) -> ProviderResult<()> {
        let mut st = self.state.lock().unwrap();
        let call = format!("tag {} {}={}", st.name_of(id), key, value);
        st.calls.push(call);
        let obj = st
            .objects
            .get_mut(id)
            .ok_or_else(|| ProviderError::new(format!("{} does not exist", id)))?;
        if key == "Name" {
            obj.name = value.to_string();
        }
        Ok(())
    }

    async fn associate(&self, association: &Association) -> ProviderResult<String> {
        let mut st = self.state.lock().unwrap();
        let (target, call) = match association {
            Association::GatewayToNetwork {
                gateway_id,
                network_id,
            } => {
                let call = format!("attach internet gateway {}", st.name_of(gateway_id));
                let gw = st.objects.get_mut(gateway_id);
                if let Some(gw) = gw {
                    gw.identity.network_id = Some(network_id.clone());
                    gw.identity.state = LifecycleState::Attached;
                }
                (gateway_id, call)
            }
            Association::RouteTableToSubnet {
                route_table_id,
                subnet_id,
            } => {
                let call = format!("associate route table {}", st.name_of(route_table_id));
                if let Some(rt) = st.objects.get_mut(route_table_id) {
                    rt.identity.subnet_id = Some(subnet_id.clone());
                }
                (route_table_id, call)
            }
            Association::VolumeToInstance {
                volume_id,
                instance_id,
                ..
            } => {
                let call = format!("attach volume {}", st.name_of(volume_id));
                if let Some(vol) = st.objects.get_mut(volume_id) {
                    vol.identity.attached_to = Some(instance_id.clone());
                    vol.identity.state = LifecycleState::InUse;
                }
                (volume_id, call)
            }
        };
        st.calls.push(call);
        Ok(format!("assoc-{}", target))
    }

    async fn disassociate(&self, association: &Association) -> ProviderResult<()> {
        let mut st = self.state.lock().unwrap();
        match association {
            Association::GatewayToNetwork { gateway_id, .. } => {
                let call = format!("detach internet gateway {}", st.name_of(gateway_id));
                st.calls.push(call);
                if let Some(gw) = st.objects.get_mut(gateway_id) {
                    gw.identity.network_id = None;
                    gw.identity.state = LifecycleState::Detached;
                }
            }
            Association::RouteTableToSubnet { route_table_id, .. } => {
                let call = format!("disassociate route table {}", st.name_of(route_table_id));
                st.calls.push(call);
                if let Some(rt) = st.objects.get_mut(route_table_id) {
                    rt.identity.subnet_id = None;
                }
            }
            Association::VolumeToInstance { volume_id, .. } => {
                let call = format!("detach volume {}", st.name_of(volume_id));
                st.calls.push(call);
                if let Some(vol) = st.objects.get_mut(volume_id) {
                    vol.identity.attached_to = None;
                    vol.identity.state = LifecycleState::Available;
                }
            }
        }
        Ok(())
    }

    async fn default_route_table(&self, network_id: &str) -> ProviderResult<ResourceIdentity> {
        let st = self.state.lock().unwrap();
        st.objects
            .values()
            .find(|o| o.main && o.identity.network_id.as_deref() == Some(network_id))
            .map(|o| o.identity.clone())
            .ok_or_else(|| ProviderError::new(format!("no main route table in {}", network_id)))
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        target: &RouteTarget,
    ) -> ProviderResult<()> {
        let mut st = self.state.lock().unwrap();
        let via = match target {
            RouteTarget::InternetGateway(id) | RouteTarget::NatGateway(id) => st.name_of(id),
        };
        let call = format!(
            "route {} {} via {}",
            st.name_of(route_table_id),
            destination_cidr,
            via
        );
        st.calls.push(call);
        Ok(())
    }

    async fn allocate_floating_ip(&self, name: &str) -> ProviderResult<String> {
        let mut st = self.state.lock().unwrap();
        let allocation_id = st.next("eipalloc");
        let public_ip = format!("54.0.0.{}", st.next_id);
        st.calls.push(format!("allocate floating ip {}", name));
        st.addresses.push(Address {
            name: name.to_string(),
            ip: FloatingIp {
                public_ip: public_ip.clone(),
                allocation_id,
                instance_id: None,
            },
        });
        Ok(public_ip)
    }

    async fn find_floating_ip(&self, public_ip: &str) -> ProviderResult<Option<FloatingIp>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .addresses
            .iter()
            .find(|a| a.ip.public_ip == public_ip)
            .map(|a| a.ip.clone()))
    }

    async fn find_floating_ip_by_name(&self, name: &str) -> ProviderResult<Option<FloatingIp>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .addresses
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.ip.clone()))
    }

    async fn release_floating_ip(&self, allocation_id: &str) -> ProviderResult<()> {
        let mut st = self.state.lock().unwrap();
        let Some(pos) = st
            .addresses
            .iter()
            .position(|a| a.ip.allocation_id == allocation_id)
        else {
            return Err(ProviderError::new(format!("{} not allocated", allocation_id)));
        };
        let released = st.addresses.remove(pos);
        st.calls.push(format!("release floating ip {}", released.name));
        Ok(())
    }

    async fn resolve_instance_type(&self, flavor: &str) -> ProviderResult<Option<String>> {
        let st = self.state.lock().unwrap();
        if st.unknown_flavors.iter().any(|f| f == flavor) {
            return Ok(None);
        }
        Ok(Some(flavor.to_string()))
    }

    async fn resolve_image(&self, image: &str) -> ProviderResult<Option<String>> {
        Ok(Some(format!("ami-{}", image)))
    }

    async fn keypair_exists(&self, _name: &str) -> ProviderResult<bool> {
        Ok(true)
    }
}

/// Executor answering the ring status command from a script and everything
/// else with a fixed greeting.
#[derive(Default)]
pub struct FakeExecutor {
    ring: Mutex<VecDeque<Result<String, ExecError>>>,
    /// Bodies whose execution fails with this output.
    failing: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_ring(&self, response: Result<String, ExecError>) {
        self.ring.lock().unwrap().push_back(response);
    }

    /// Make every run whose body contains `needle` fail.
    pub fn fail_on(&self, needle: &str, output: &str) {
        self.failing
            .lock()
            .unwrap()
            .push((needle.to_string(), output.to_string()));
    }

    /// `(host, body)` of every run, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn runs_of(&self, needle: &str) -> usize {
        self.calls().iter().filter(|(_, b)| b.contains(needle)).count()
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn run(&self, host: &str, body: &str, _env: &Env, _verbose: bool) -> Result<String, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), body.to_string()));
        if body == cloudrig_core::converge::RING_STATUS_COMMAND {
            return self
                .ring
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()));
        }
        let failing = self.failing.lock().unwrap();
        if let Some((_, output)) = failing.iter().find(|(needle, _)| body.contains(needle.as_str())) {
            return Err(ExecError::Failed {
                status: 1,
                output: output.clone(),
            });
        }
        Ok(format!("ran on {}", host))
    }
}

/// Sink keeping everything it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<LogRecord>>,
    pub errors: Mutex<Vec<String>>,
    pub notices: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn titles(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.title.clone())
            .collect()
    }

    pub fn find_record(&self, title: &str) -> Option<LogRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.title == title)
            .cloned()
    }
}

impl OutputSink for RecordingSink {
    fn record(&self, record: &LogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn error(&self, target: &str, err: &DeployError) {
        self.errors.lock().unwrap().push(format!("{}: {}", target, err));
    }

    fn notice(&self, text: &str) {
        self.notices.lock().unwrap().push(text.to_string());
    }
}

/// Fast dispatcher for workflow tests.
pub fn dispatcher(sink: Arc<RecordingSink>) -> Dispatcher {
    Dispatcher::new(
        DispatcherConfig {
            max_workers: 10,
            throttle: Duration::from_millis(1),
        },
        sink,
    )
}

pub fn context(
    project: Project,
    dir: &Path,
    provider: Arc<FakeProvider>,
    executor: Arc<FakeExecutor>,
    sink: Arc<RecordingSink>,
) -> DeployContext {
    DeployContext {
        project,
        project_dir: dir.to_path_buf(),
        provider,
        executor,
        dispatcher: dispatcher(sink),
        verbose: false,
    }
}

/// Write the service scripts the test project refers to.
pub fn write_scripts(dir: &Path) {
    for name in ["start.sh", "stop.sh", "config.sh"] {
        std::fs::write(dir.join(name), format!("echo {}\n", name)).unwrap();
    }
}
