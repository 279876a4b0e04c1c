//! Catalog loading tests over temporary and shipped asset trees

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::manifests::{Catalog, Kind, StateName};

    fn shipped_assets() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../assets")
    }

    fn empty_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in StateName::ALL {
            fs::create_dir_all(dir.path().join(name.dir())).unwrap();
        }
        dir
    }

    const SERVICE_ACCOUNT: &str = "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: nvidia-driver\n";
    const ROLE: &str = "apiVersion: rbac.authorization.k8s.io/v1\nkind: Role\nmetadata:\n  name: nvidia-driver\nrules: []\n";
    const CONFIG_MAPS: &str = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: first
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: second
---
";
    const SCC: &str = "apiVersion: security.openshift.io/v1\nkind: SecurityContextConstraints\nmetadata:\n  name: nvidia-driver\n";

    #[test]
    fn test_files_are_read_in_lexicographic_order() {
        let tree = empty_tree();
        let driver = tree.path().join("state-driver");
        fs::write(driver.join("0200_role.yaml"), ROLE).unwrap();
        fs::write(driver.join("0100_service_account.yaml"), SERVICE_ACCOUNT).unwrap();
        fs::write(driver.join("0300_configmaps.yml"), CONFIG_MAPS).unwrap();
        fs::write(driver.join("README.md"), "not a manifest").unwrap();

        let catalog = Catalog::load(tree.path(), false).unwrap();
        assert_eq!(catalog.states.len(), StateName::ALL.len());

        let state = catalog.state(StateName::Driver).unwrap();
        assert_eq!(state.controls, vec![Kind::ServiceAccount, Kind::Role, Kind::ConfigMap]);
        assert_eq!(state.resources.config_maps.len(), 2);
        assert!(catalog.state(StateName::Dcgm).unwrap().controls.is_empty());
    }

    #[test]
    fn test_openshift_paths_only_on_openshift() {
        let tree = empty_tree();
        let nested = tree.path().join("state-driver").join("openshift");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("0100_scc.yaml"), SCC).unwrap();

        let vanilla = Catalog::load(tree.path(), false).unwrap();
        assert!(vanilla.state(StateName::Driver).unwrap().controls.is_empty());

        let openshift = Catalog::load(tree.path(), true).unwrap();
        let state = openshift.state(StateName::Driver).unwrap();
        assert_eq!(state.controls, vec![Kind::SecurityContextConstraints]);
        assert!(state.resources.security_context_constraints.is_some());
    }

    #[test]
    fn test_unknown_kinds_are_skipped() {
        let tree = empty_tree();
        fs::write(
            tree.path().join("state-dcgm").join("0100_secret.yaml"),
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: s\n",
        )
        .unwrap();
        let catalog = Catalog::load(tree.path(), false).unwrap();
        assert!(catalog.state(StateName::Dcgm).unwrap().controls.is_empty());
    }

    #[test]
    fn test_decode_failure_is_fatal() {
        let tree = empty_tree();
        fs::write(
            tree.path().join("state-dcgm").join("0100_broken.yaml"),
            "apiVersion: apps/v1\nkind: DaemonSet\nmetadata: [not, a, map]\n",
        )
        .unwrap();
        let err = Catalog::load(tree.path(), false).unwrap_err();
        assert!(err.to_string().contains("0100_broken.yaml"));
    }

    #[test]
    fn test_missing_state_directory_is_fatal() {
        let tree = empty_tree();
        fs::remove_dir(tree.path().join("state-cc-manager")).unwrap();
        let err = Catalog::load(tree.path(), false).unwrap_err();
        assert!(err.to_string().contains("state-cc-manager"));
    }

    #[test]
    fn test_shipped_assets_decode() {
        for openshift in [false, true] {
            let catalog = Catalog::load(&shipped_assets(), openshift).unwrap();
            assert_eq!(catalog.states.len(), 19);

            for name in StateName::ALL {
                let state = catalog.state(name).unwrap();
                if !matches!(name, StateName::PreRequisites | StateName::OperatorMetrics) {
                    assert!(state.resources.daemon_set.is_some(), "{name} has no DaemonSet");
                }
            }

            let prereq = catalog.state(StateName::PreRequisites).unwrap();
            assert!(prereq.controls.contains(&Kind::RuntimeClass));

            let driver = catalog.state(StateName::Driver).unwrap();
            assert_eq!(
                driver.controls.contains(&Kind::SecurityContextConstraints),
                openshift,
                "SCC presence must follow the platform"
            );
        }
    }
}
