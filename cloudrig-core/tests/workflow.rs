//! End-to-end workflow runs against the fake provider and executor.

mod common;

use std::sync::Arc;

use cloudrig_core::error::DeployError;
use cloudrig_core::provider::{LifecycleState, ResourceIdentity, ResourceKind};
use cloudrig_core::remote::ExecError;
use cloudrig_core::select::SelectionError;
use cloudrig_core::workflow::{DeployContext, Workflow};
use common::{context, project, write_scripts, FakeExecutor, FakeProvider, RecordingSink};

struct Harness {
    ctx: DeployContext,
    provider: Arc<FakeProvider>,
    executor: Arc<FakeExecutor>,
    sink: Arc<RecordingSink>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path());
    let provider = FakeProvider::new();
    let executor = FakeExecutor::new();
    let sink = Arc::new(RecordingSink::default());
    let ctx = context(
        project(),
        dir.path(),
        provider.clone(),
        executor.clone(),
        sink.clone(),
    );
    Harness {
        ctx,
        provider,
        executor,
        sink,
        _dir: dir,
    }
}

async fn run(h: &mut Harness, workflow: Workflow, selector: Option<&str>) -> cloudrig_core::Report {
    workflow.run(&mut h.ctx, selector).await.unwrap()
}

#[tokio::test]
async fn test_networking_bring_up_and_teardown_order() {
    let mut h = harness();
    assert!(run(&mut h, Workflow::CreateFloatingIps, None).await.is_success());
    assert!(run(&mut h, Workflow::CreateNetworking, None).await.is_success());

    assert_eq!(
        h.provider.calls_matching(&["create"]),
        vec![
            "create network itest_vpc",
            "create subnet itest_private",
            "create subnet itest_public",
            "create internet gateway itest_router",
            "create nat gateway itest_natgw",
            "create route table itest_private_rt",
        ]
    );
    let routes = h.provider.calls_matching(&["route"]);
    assert_eq!(routes.len(), 2);
    assert!(routes[0].ends_with("0.0.0.0/0 via itest_router"));
    assert!(routes[1].ends_with("0.0.0.0/0 via itest_natgw"));
    let tags = h.provider.calls_matching(&["tag"]);
    assert_eq!(tags.len(), 1);
    assert!(tags[0].ends_with("Name=itest_public_vpc_default_rt"));

    h.provider.clear_calls();
    assert!(run(&mut h, Workflow::DeleteNetworking, None).await.is_success());
    assert_eq!(
        h.provider.calls_matching(&["delete", "detach"]),
        vec![
            "delete nat gateway itest_natgw",
            "detach internet gateway itest_router",
            "delete internet gateway itest_router",
            "delete subnet itest_public",
            "delete subnet itest_private",
            "delete route table itest_private_rt",
            "delete network itest_vpc",
        ]
    );
}

#[tokio::test]
async fn test_networking_rerun_creates_nothing() {
    let mut h = harness();
    run(&mut h, Workflow::CreateFloatingIps, None).await;
    run(&mut h, Workflow::CreateNetworking, None).await;
    h.provider.clear_calls();

    let report = run(&mut h, Workflow::CreateNetworking, None).await;

    assert!(report.is_success());
    assert!(h
        .provider
        .calls_matching(&["create", "attach", "associate", "route", "allocate"])
        .is_empty());
}

#[tokio::test]
async fn test_teardown_of_nothing_succeeds() {
    let mut h = harness();
    let report = run(&mut h, Workflow::DeleteNetworking, None).await;
    assert!(report.is_success());
    assert!(h.provider.calls().is_empty());
    let record = h.sink.find_record("delete_networking").unwrap();
    assert!(record.contains("will not delete network itest_vpc"));
}

#[tokio::test]
async fn test_networking_stops_at_first_conflict() {
    let mut h = harness();
    run(&mut h, Workflow::CreateFloatingIps, None).await;
    h.provider.seed(
        ResourceKind::InternetGateway,
        "itest_router",
        ResourceIdentity::new("igw-foreign", LifecycleState::Attached).in_network("vpc-foreign"),
    );

    let report = run(&mut h, Workflow::CreateNetworking, None).await;

    assert_eq!(report.failed, vec!["create_networking".to_string()]);
    assert!(h.provider.calls_matching(&["create"]).iter().all(|c| !c.contains("nat gateway")));
    assert_eq!(h.provider.count(ResourceKind::NatGateway), 0);
    assert!(h.sink.errors.lock().unwrap()[0].contains("conflict on internet gateway itest_router"));
}

#[tokio::test]
async fn test_floating_ips_recorded_and_released() {
    let mut h = harness();
    assert!(run(&mut h, Workflow::CreateFloatingIps, None).await.is_success());
    let bastion_ip = h.ctx.project.ssh_config.external_ip_address.clone();
    assert!(!bastion_ip.is_empty());
    assert!(!h.ctx.project.network.public_subnet.nat_gateway_public_ip.is_empty());
    assert!(h.sink.find_record("create_floating_ips").unwrap().contains(&bastion_ip));

    // allocation is idempotent by name
    run(&mut h, Workflow::CreateFloatingIps, None).await;
    assert_eq!(h.provider.calls_matching(&["allocate"]).len(), 2);
    assert_eq!(h.ctx.project.ssh_config.external_ip_address, bastion_ip);

    assert!(run(&mut h, Workflow::DeleteFloatingIps, None).await.is_success());
    assert_eq!(h.provider.calls_matching(&["release"]).len(), 2);
    assert!(h.ctx.project.ssh_config.external_ip_address.is_empty());
    assert!(h.ctx.project.network.public_subnet.nat_gateway_public_ip.is_empty());

    // nothing recorded any more
    assert!(!run(&mut h, Workflow::DeleteFloatingIps, None).await.is_success());
}

async fn bring_up(h: &mut Harness) {
    run(h, Workflow::CreateFloatingIps, None).await;
    run(h, Workflow::CreateNetworking, None).await;
    assert!(run(h, Workflow::CreateSecurityGroups, None).await.is_success());
}

#[tokio::test]
async fn test_instances_leave_project_untouched() {
    let mut h = harness();
    bring_up(&mut h).await;
    let before = h.ctx.project.clone();

    let report = run(&mut h, Workflow::CreateInstances, Some("cass*")).await;

    assert!(report.is_success());
    assert_eq!(report.submitted, 2);
    assert_eq!(h.ctx.project, before);
    assert_eq!(h.provider.count(ResourceKind::Instance), 2);
    let cass1 = h.provider.get(ResourceKind::Instance, "itest-cass1").unwrap();
    let private = h.provider.get(ResourceKind::Subnet, "itest_private").unwrap();
    assert_eq!(cass1.subnet_id.as_deref(), Some(private.id.as_str()));
    assert!(h
        .sink
        .notices
        .lock()
        .unwrap()
        .iter()
        .any(|n| n.contains("ssh-keygen -f ~/.ssh/known_hosts -R 10.5.0.12")));

    let report = run(&mut h, Workflow::DeleteInstances, Some("*")).await;
    assert!(report.is_success());
    assert_eq!(h.provider.count(ResourceKind::Instance), 0);
}

#[tokio::test]
async fn test_unresolved_flavor_submits_nothing() {
    let mut h = harness();
    bring_up(&mut h).await;
    h.provider.reject_flavor("c5.xlarge");
    h.provider.clear_calls();

    let err = Workflow::CreateInstances
        .run(&mut h.ctx, Some("*"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("c5.xlarge"));
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_bad_selector_submits_nothing() {
    let mut h = harness();

    let err = Workflow::PingInstances
        .run(&mut h.ctx, Some("ghost-*"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::Selection(SelectionError::NoMatch { .. })
    ));

    let err = Workflow::StartServices.run(&mut h.ctx, None).await.unwrap_err();
    assert!(matches!(err, DeployError::Selection(SelectionError::Empty { .. })));
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_volumes_lifecycle() {
    let mut h = harness();
    bring_up(&mut h).await;
    run(&mut h, Workflow::CreateInstances, Some("cass1")).await;

    assert!(run(&mut h, Workflow::CreateVolumes, Some("cass1")).await.is_success());
    assert!(run(&mut h, Workflow::AttachVolumes, Some("cass1")).await.is_success());
    let vol = h.provider.get(ResourceKind::Volume, "itest_cass1_data").unwrap();
    let inst = h.provider.get(ResourceKind::Instance, "itest-cass1").unwrap();
    assert_eq!(vol.attached_to, Some(inst.id));

    // attached volumes are not deleted from under the instance
    let report = run(&mut h, Workflow::DeleteVolumes, Some("cass1")).await;
    assert_eq!(report.failed, vec!["cass1.data".to_string()]);
}

#[tokio::test]
async fn test_no_volumes_is_success() {
    let mut h = harness();
    let report = run(&mut h, Workflow::CreateVolumes, Some("cass2,bastion")).await;
    assert!(report.is_success());
    assert_eq!(report.submitted, 0);
    assert_eq!(
        h.sink.notices.lock().unwrap().as_slice(),
        ["No volumes to create/attach/delete".to_string()]
    );
}

#[tokio::test]
async fn test_services_run_scripts_per_instance() {
    let mut h = harness();

    let report = run(&mut h, Workflow::StartServices, Some("cass*")).await;
    assert!(report.is_success());
    assert_eq!(h.executor.runs_of("echo start.sh"), 2);

    // bastion has no scripts configured, which is fine
    let report = run(&mut h, Workflow::InstallServices, Some("bastion")).await;
    assert!(report.is_success());
    assert!(h.executor.calls().iter().all(|(host, _)| host != "10.5.1.10"));

    let report = run(&mut h, Workflow::PingInstances, Some("bastion,cass1")).await;
    assert!(report.is_success());
    assert_eq!(h.executor.runs_of("id"), 2);
}

#[tokio::test]
async fn test_failing_script_fails_only_its_item() {
    let mut h = harness();
    h.executor.fail_on("echo stop.sh", "service refused to stop");

    let report = run(&mut h, Workflow::StopServices, Some("cass*")).await;

    assert_eq!(report.submitted, 2);
    assert_eq!(report.failed.len(), 2);
    let record = h.sink.find_record("stop_services cass1").unwrap();
    assert!(record.contains("service refused to stop"));
}

const RING_PARTIAL: &str = "Datacenter: dc1\nStatus=Up/Down\n|/ State=Normal/Leaving/Joining/Moving\nUN  10.5.0.11  1.2 MiB\nDN  10.5.0.12  1.1 MiB\n";
const RING_HEALTHY: &str = "Datacenter: dc1\nStatus=Up/Down\n|/ State=Normal/Leaving/Joining/Moving\nUN  10.5.0.11  1.2 MiB\nUN  10.5.0.12  1.1 MiB\n";

#[tokio::test(start_paused = true)]
async fn test_config_cluster_converges() {
    let mut h = harness();
    h.executor.push_ring(Err(ExecError::Failed {
        status: 1,
        output: "nodetool: Failed to connect to '127.0.0.1:7199'".into(),
    }));
    h.executor.push_ring(Ok(RING_PARTIAL.into()));
    h.executor.push_ring(Ok(RING_HEALTHY.into()));

    let report = run(&mut h, Workflow::ConfigCluster, None).await;

    assert!(report.is_success(), "{:?}", report);
    assert_eq!(report.submitted, 5);
    assert_eq!(h.executor.runs_of("echo stop.sh"), 2);
    assert_eq!(h.executor.runs_of("echo config.sh"), 2);
    assert_eq!(h.executor.runs_of("nodetool"), 3);
    // the ring is probed on the first member in nickname order
    assert!(h
        .executor
        .calls()
        .iter()
        .filter(|(_, body)| body.contains("nodetool"))
        .all(|(host, _)| host == "10.5.0.11"));
}

#[tokio::test(start_paused = true)]
async fn test_config_cluster_unknown_output_is_fatal() {
    let mut h = harness();
    h.executor.push_ring(Ok("error: something else entirely".into()));

    let report = run(&mut h, Workflow::ConfigCluster, None).await;

    assert_eq!(report.failed, vec!["10.5.0.11".to_string()]);
    assert_eq!(h.executor.runs_of("nodetool"), 1);
    assert!(h.sink.errors.lock().unwrap()[0].contains("unknown status output"));
}

#[tokio::test(start_paused = true)]
async fn test_config_cluster_stop_failure_skips_later_phases() {
    let mut h = harness();
    h.executor.fail_on("echo stop.sh", "still running");

    let report = run(&mut h, Workflow::ConfigCluster, None).await;

    assert!(!report.is_success());
    assert_eq!(report.submitted, 2);
    assert_eq!(h.executor.runs_of("echo config.sh"), 0);
    assert_eq!(h.executor.runs_of("nodetool"), 0);
}
