//! Behavioural tests for reconciling accounts against their host files.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use srv2ssh::test_support::{FakeCloud, FakeConnector, StaticProbe};
use srv2ssh::{
    AddressBook, HostStore, ImageInfo, KeyLocator, MachineAddress, PortInfo, ReconcileError,
    Reconciler, RouterInfo, ServerListing, SshHost, SubnetInfo, parse_hosts,
};
use tempfile::TempDir;

struct Workspace {
    _tmp: TempDir,
    ssh_dir: Utf8PathBuf,
    key_dir: Utf8PathBuf,
}

impl Workspace {
    fn reconciler(
        &self,
        connector: FakeConnector,
        probe: StaticProbe,
    ) -> Reconciler<FakeConnector, StaticProbe> {
        let keys =
            KeyLocator::from_search_path(self.key_dir.as_str(), &self.key_dir, &self.key_dir);
        Reconciler::new(connector, probe, HostStore::new(self.ssh_dir.clone()), keys)
    }

    fn host_file(&self, account: &str) -> Utf8PathBuf {
        self.ssh_dir.join(format!("{account}.sshcfg"))
    }

    fn write_host_file(&self, account: &str, contents: &str) {
        fs::create_dir_all(&self.ssh_dir).unwrap_or_else(|err| panic!("mkdir: {err}"));
        fs::write(self.host_file(account), contents)
            .unwrap_or_else(|err| panic!("write host file: {err}"));
    }

    fn read(path: &Utf8Path) -> String {
        fs::read_to_string(path).unwrap_or_else(|err| panic!("read {path}: {err}"))
    }
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let key_dir = root.join("keys");
    fs::create_dir_all(&key_dir).unwrap_or_else(|err| panic!("mkdir keys: {err}"));
    Workspace {
        _tmp: tmp,
        ssh_dir: root.join(".ssh"),
        key_dir,
    }
}

fn server(name: &str, addresses: AddressBook) -> ServerListing {
    ServerListing {
        id: format!("id-{name}"),
        name: name.to_owned(),
        status: String::from("ACTIVE"),
        addresses,
        ..ServerListing::default()
    }
}

fn floating(name: &str, addr: &str) -> ServerListing {
    server(
        name,
        AddressBook::new().with_network(
            "private",
            [MachineAddress::fixed("10.1.0.4"), MachineAddress::floating(addr)],
        ),
    )
}

fn single_account(cloud: FakeCloud) -> FakeConnector {
    FakeConnector::new().with_account("acct", cloud)
}

#[rstest]
#[tokio::test]
async fn existing_host_keeps_user_and_gets_new_address(workspace: Workspace) {
    workspace.write_host_file("acct", "Host acct-vm1\n  Hostname 1.2.3.4\n  User alice\n");
    let cloud = FakeCloud::new().with_server(floating("vm1", "5.6.7.8"));
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    let expected = SshHost {
        user: Some(String::from("alice")),
        ..SshHost::new("acct-vm1", "5.6.7.8")
    };
    assert_eq!(summary.hosts, vec![expected.clone()]);
    assert_eq!(summary.written(), 1);
    let on_disk = parse_hosts(&Workspace::read(&workspace.host_file("acct")));
    assert_eq!(on_disk, vec![expected]);
}

#[rstest]
#[tokio::test]
async fn hand_written_block_gets_its_address_filled_in(workspace: Workspace) {
    workspace.write_host_file("acct", "Host acct-vm1\n  User alice\n  Port 2222\n");
    let cloud = FakeCloud::new().with_server(floating("vm1", "5.6.7.8"));
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    let expected = SshHost {
        user: Some(String::from("alice")),
        misc: vec![String::from("Port 2222")],
        ..SshHost::new("acct-vm1", "5.6.7.8")
    };
    assert_eq!(summary.hosts, vec![expected.clone()]);
    let on_disk = parse_hosts(&Workspace::read(&workspace.host_file("acct")));
    assert_eq!(on_disk, vec![expected]);
}

#[rstest]
#[tokio::test]
async fn hand_written_block_without_address_is_not_written(workspace: Workspace) {
    workspace.write_host_file(
        "acct",
        "Host acct-vm1\n  User alice\n\nHost acct-vm2\n  Hostname 1.2.3.4\n",
    );
    let private_only = server(
        "vm1",
        AddressBook::new().with_network("priv", [MachineAddress::fixed("192.168.1.4")]),
    );
    let cloud = FakeCloud::new()
        .with_server(private_only)
        .with_server(floating("vm2", "5.6.7.9"));
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    assert_eq!(summary.hosts, vec![SshHost::new("acct-vm2", "5.6.7.9")]);
    assert_eq!(summary.written(), 1);
    assert!(!Workspace::read(&workspace.host_file("acct")).contains("acct-vm1"));
}

#[rstest]
#[tokio::test]
async fn inventory_changes_between_runs_are_followed(workspace: Workspace) {
    let cloud = FakeCloud::new()
        .with_server(floating("vm1", "5.6.7.8"))
        .with_server(floating("vm2", "5.6.7.9"));
    let reconciler = workspace.reconciler(single_account(cloud.clone()), StaticProbe::off_cloud());
    reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("first run: {err}"));
    fs::write(
        workspace.host_file("acct"),
        Workspace::read(&workspace.host_file("acct")).replace(
            "Host acct-vm1\n  Hostname 5.6.7.8\n",
            "Host acct-vm1\n  Hostname 5.6.7.8\n  User alice\n",
        ),
    )
    .unwrap_or_else(|err| panic!("edit host file: {err}"));

    cloud.replace_servers(vec![floating("vm1", "5.6.7.10"), floating("vm3", "5.6.7.11")]);
    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("second run: {err}"));

    assert_eq!(
        summary.hosts,
        vec![
            SshHost {
                user: Some(String::from("alice")),
                ..SshHost::new("acct-vm1", "5.6.7.10")
            },
            SshHost::new("acct-vm3", "5.6.7.11"),
        ]
    );
    let on_disk = Workspace::read(&workspace.host_file("acct"));
    assert!(!on_disk.contains("acct-vm2"), "{on_disk}");
}

#[rstest]
#[tokio::test]
async fn vanished_machine_is_removed(workspace: Workspace) {
    workspace.write_host_file(
        "acct",
        "Host acct-vm-old\n  Hostname 1.2.3.4\n\nHost acct-vm1\n  Hostname 1.2.3.5\n",
    );
    let cloud = FakeCloud::new().with_server(floating("vm1", "5.6.7.8"));
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    let aliases: Vec<&str> = summary.hosts.iter().map(|host| host.alias.as_str()).collect();
    assert_eq!(aliases, ["acct-vm1"]);
    assert!(!Workspace::read(&workspace.host_file("acct")).contains("acct-vm-old"));
}

#[rstest]
#[tokio::test]
async fn second_run_rewrites_identical_bytes(workspace: Workspace) {
    workspace.write_host_file(
        "acct",
        "# notes\nHost acct-vm1\n  hostname 1.2.3.4\n  Port 2222\n  ForwardAgent yes\n",
    );
    let cloud = FakeCloud::new()
        .with_server(floating("vm1", "5.6.7.8"))
        .with_server(floating("vm2", "5.6.7.9"));
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("first run: {err}"));
    let first = Workspace::read(&workspace.host_file("acct"));
    reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("second run: {err}"));
    let second = Workspace::read(&workspace.host_file("acct"));

    assert_eq!(first, second);
    assert!(first.contains("  Port 2222\n"), "{first}");
    assert!(first.contains("  ForwardAgent yes\n"), "{first}");
}

#[rstest]
#[tokio::test]
async fn empty_result_leaves_file_untouched(workspace: Workspace) {
    let original = "Host acct-vm-old\n  Hostname 1.2.3.4\n";
    workspace.write_host_file("acct", original);
    let stopped = ServerListing {
        status: String::from("SHUTOFF"),
        ..floating("vm-old", "5.6.7.8")
    };
    let cloud = FakeCloud::new().with_server(stopped);
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    assert_eq!(summary.written(), 0);
    assert_eq!(summary.path, None);
    assert_eq!(Workspace::read(&workspace.host_file("acct")), original);
}

#[rstest]
#[tokio::test]
async fn unresolvable_machine_is_not_added(workspace: Workspace) {
    let private_only = server(
        "vm1",
        AddressBook::new().with_network("priv", [MachineAddress::fixed("192.168.1.4")]),
    );
    let cloud = FakeCloud::new().with_server(private_only);
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    assert!(summary.hosts.is_empty());
    assert!(!workspace.host_file("acct").exists());
}

#[rstest]
#[tokio::test]
async fn on_cloud_host_prefers_internal_routes(workspace: Workspace) {
    let cloud = FakeCloud::new()
        .with_subnet(SubnetInfo {
            id: String::from("sn-lan"),
            name: String::from("lan"),
        })
        .with_subnet(SubnetInfo {
            id: String::from("sn-backend"),
            name: String::from("backend"),
        })
        .with_network("net-own", &["sn-lan"])
        .with_router(
            RouterInfo {
                id: String::from("r1"),
                name: String::from("edge"),
            },
            vec![PortInfo {
                device_owner: String::from("network:router_interface"),
                subnet_ids: vec![String::from("sn-lan"), String::from("sn-backend")],
            }],
        )
        .with_server(server(
            "web",
            AddressBook::new()
                .with_network("public", [MachineAddress::floating("203.0.113.9")])
                .with_network("lan", [MachineAddress::fixed("10.0.0.5")]),
        ))
        .with_server(server(
            "db",
            AddressBook::new().with_network("backend", [MachineAddress::fixed("192.168.5.5")]),
        ));
    let reconciler =
        workspace.reconciler(single_account(cloud), StaticProbe::attached(&["net-own"]));

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    assert_eq!(
        summary.hosts,
        vec![
            SshHost::new("acct-web", "10.0.0.5"),
            SshHost::new("acct-db", "192.168.5.5"),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn login_user_and_key_file_are_filled_in(workspace: Workspace) {
    fs::write(workspace.key_dir.join("deploy.pem"), "key")
        .unwrap_or_else(|err| panic!("write key: {err}"));
    let vm = ServerListing {
        key_name: Some(String::from("deploy")),
        image_id: Some(String::from("img-1")),
        ..floating("vm1", "5.6.7.8")
    };
    let cloud = FakeCloud::new().with_server(vm).with_image(ImageInfo {
        id: String::from("img-1"),
        name: String::from("Ubuntu 24.04"),
        ..ImageInfo::default()
    });
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    assert_eq!(
        summary.hosts,
        vec![SshHost {
            user: Some(String::from("ubuntu")),
            identity_file: Some(workspace.key_dir.join("deploy.pem").to_string()),
            ..SshHost::new("acct-vm1", "5.6.7.8")
        }]
    );
}

#[rstest]
#[tokio::test]
async fn rejected_login_is_retried_with_default_domain(workspace: Workspace) {
    let cloud = FakeCloud::new().with_server(floating("vm1", "5.6.7.8"));
    let connector = single_account(cloud).requiring_domain("acct");
    let reconciler = workspace
        .reconciler(connector.clone(), StaticProbe::off_cloud())
        .with_default_domain("corp");

    let summary = reconciler
        .reconcile("acct")
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    assert_eq!(summary.written(), 1);
    assert_eq!(
        connector.attempts(),
        vec![
            (String::from("acct"), None),
            (String::from("acct"), Some(String::from("corp"))),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn listing_failure_aborts_the_account(workspace: Workspace) {
    let cloud = FakeCloud::new().with_failing_server_listing();
    let reconciler = workspace.reconciler(single_account(cloud), StaticProbe::off_cloud());

    let result = reconciler.reconcile("acct").await;

    assert!(
        matches!(result, Err(ReconcileError::Listing { ref account, .. }) if account == "acct"),
        "unexpected result: {result:?}"
    );
}

#[rstest]
#[tokio::test]
async fn failing_account_does_not_block_others(workspace: Workspace) {
    let connector = FakeConnector::new()
        .with_account("good", FakeCloud::new().with_server(floating("vm1", "5.6.7.8")))
        .with_account("empty", FakeCloud::new());
    let reconciler = workspace.reconciler(connector, StaticProbe::off_cloud());
    let accounts = [
        String::from("unknown"),
        String::from("good"),
        String::from("empty"),
    ];

    let summary = reconciler
        .reconcile_all(&accounts, Some("openstacksrv.sshcfg"))
        .await;

    assert_eq!(summary.failed, ["unknown"]);
    assert_eq!(summary.total_written(), 1);
    let umbrella = summary
        .umbrella
        .unwrap_or_else(|| panic!("umbrella file should be written"));
    assert_eq!(umbrella, workspace.ssh_dir.join("openstacksrv.sshcfg"));
    let includes: Vec<String> = Workspace::read(&umbrella)
        .lines()
        .filter_map(|line| line.strip_prefix("Include ").map(str::to_owned))
        .collect();
    assert_eq!(includes, [workspace.host_file("good").to_string()]);
}

#[rstest]
#[tokio::test]
async fn umbrella_is_skipped_when_nothing_was_written(workspace: Workspace) {
    let connector = FakeConnector::new().with_account("empty", FakeCloud::new());
    let reconciler = workspace.reconciler(connector, StaticProbe::off_cloud());

    let summary = reconciler
        .reconcile_all(&[String::from("empty")], Some("openstacksrv.sshcfg"))
        .await;

    assert_eq!(summary.umbrella, None);
    assert!(!workspace.ssh_dir.join("openstacksrv.sshcfg").exists());
}
