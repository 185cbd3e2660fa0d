//! Tests for catalog normalization
//!
//! These tests verify:
//! - Every accepted catalog shape yields the same records
//! - Malformed fragments are skipped individually with a warning
//! - The CPU field candidate order

use super::*;
use serde_json::json;

fn ids(catalog: &NormalizedCatalog) -> Vec<&str> {
    catalog.records.iter().map(|r| r.id.as_str()).collect()
}

mod shape_tests {
    use super::*;

    #[test]
    fn test_list_format_in_trpc_envelope() {
        let payload = json!({
            "result": {"data": {"json": [
                {"name": "project1", "services": [{"name": "web"}, {"name": "api"}]},
                {"name": "project2", "services": [{"name": "database"}]}
            ]}}
        });

        let catalog = normalize(&payload);
        assert_eq!(
            ids(&catalog),
            vec!["project1_web", "project1_api", "project2_database"]
        );
        assert!(catalog.warnings.is_empty());
    }

    #[test]
    fn test_single_project_format() {
        let payload = json!({
            "result": {"data": {"json": {
                "name": "myproject",
                "services": [{"name": "web"}, {"name": "worker"}]
            }}}
        });

        let catalog = normalize(&payload);
        assert_eq!(ids(&catalog), vec!["myproject_web", "myproject_worker"]);
        assert!(catalog.warnings.is_empty());
    }

    #[test]
    fn test_keyed_projects_format() {
        let payload = json!({
            "result": {"data": {"json": {
                "proj1": {"name": "project1", "services": [{"name": "app"}]},
                "proj2": {"name": "project2", "services": [{"name": "db"}]}
            }}}
        });

        let catalog = normalize(&payload);
        assert_eq!(ids(&catalog), vec!["project1_app", "project2_db"]);
    }

    #[test]
    fn test_keyed_project_falls_back_to_key_for_name() {
        let payload = json!({"shop": {"services": [{"name": "web"}]}});

        let catalog = normalize(&payload);
        assert_eq!(ids(&catalog), vec!["shop_web"]);
    }

    #[test]
    fn test_bare_list_without_envelope() {
        let payload = json!([{"name": "p", "services": [{"name": "s"}]}]);
        assert_eq!(ids(&normalize(&payload)), vec!["p_s"]);
    }

    #[test]
    fn test_partial_envelopes() {
        let result_only = json!({"result": [{"name": "p", "services": [{"name": "a"}]}]});
        let data_json = json!({"data": {"json": [{"name": "p", "services": [{"name": "b"}]}]}});

        assert_eq!(ids(&normalize(&result_only)), vec!["p_a"]);
        assert_eq!(ids(&normalize(&data_json)), vec!["p_b"]);
    }

    #[test]
    fn test_unrecognizable_payload_yields_warning_not_failure() {
        let catalog = normalize(&json!({"result": {"data": {"json": 42}}}));
        assert!(catalog.records.is_empty());
        assert_eq!(catalog.warnings.len(), 1);
        assert_eq!(catalog.warnings[0].location, "catalog");
    }

    #[test]
    fn test_shape_detection() {
        let list = json!([]);
        let single = json!({"name": "p", "services": []});
        let keyed = json!({"a": {}});

        assert_eq!(CatalogShape::detect(&list).unwrap().label(), "list");
        assert_eq!(CatalogShape::detect(&single).unwrap().label(), "single");
        assert_eq!(CatalogShape::detect(&keyed).unwrap().label(), "keyed");
        assert!(CatalogShape::detect(&json!("projects")).is_none());
    }
}

mod malformed_fragment_tests {
    use super::*;

    #[test]
    fn test_bare_identifier_project_is_skipped_with_one_warning() {
        let payload = json!([
            {"name": "alpha", "services": [{"name": "web", "cpu": 50}]},
            "beta",
            {"name": "gamma", "services": [{"name": "api", "cpu": 20}]}
        ]);

        let catalog = normalize(&payload);
        assert_eq!(ids(&catalog), vec!["alpha_web", "gamma_api"]);
        assert_eq!(catalog.warnings.len(), 1);
        assert_eq!(catalog.warnings[0].location, "projects[1]");
        assert!(catalog.warnings[0].message.contains("string"));
    }

    #[test]
    fn test_project_without_name_is_skipped() {
        let payload = json!([
            {"services": [{"name": "web"}]},
            {"name": "ok", "services": [{"name": "web"}]}
        ]);

        let catalog = normalize(&payload);
        assert_eq!(ids(&catalog), vec!["ok_web"]);
        assert_eq!(catalog.warnings.len(), 1);
    }

    #[test]
    fn test_services_of_wrong_type_is_skipped() {
        let payload = json!([{"name": "p", "services": {"name": "web"}}]);

        let catalog = normalize(&payload);
        assert!(catalog.records.is_empty());
        assert_eq!(catalog.warnings.len(), 1);
    }

    #[test]
    fn test_missing_services_is_not_a_warning() {
        let catalog = normalize(&json!([{"name": "empty"}]));
        assert!(catalog.records.is_empty());
        assert!(catalog.warnings.is_empty());
    }

    #[test]
    fn test_bad_services_are_skipped_individually() {
        let payload = json!([{"name": "p", "services": [
            {"name": "good"},
            7,
            {"name": ""},
            {"image": "nginx"},
            {"name": "also-good"}
        ]}]);

        let catalog = normalize(&payload);
        assert_eq!(ids(&catalog), vec!["p_good", "p_also-good"]);
        assert_eq!(catalog.warnings.len(), 3);
        assert_eq!(catalog.warnings[0].location, "projects[0].services[1]");
    }
}

mod field_tests {
    use super::*;

    #[test]
    fn test_cpu_candidate_order_is_declared() {
        assert_eq!(CPU_FIELD_CANDIDATES[0], "cpu");
        assert_eq!(CPU_FIELD_CANDIDATES[1], "cpuUsage");
        assert!(CPU_FIELD_CANDIDATES.contains(&"stats.cpu"));
    }

    #[test]
    fn test_primary_cpu_field_wins() {
        let value = json!({"cpu": 42.5, "cpuUsage": 99.0});
        assert_eq!(cpu_percent(&value), Some(42.5));
    }

    #[test]
    fn test_synonym_used_when_primary_missing_or_null() {
        assert_eq!(cpu_percent(&json!({"cpuUsage": 12})), Some(12.0));
        assert_eq!(cpu_percent(&json!({"cpu": null, "cpuUsage": 12})), Some(12.0));
    }

    #[test]
    fn test_non_numeric_candidate_is_skipped() {
        let value = json!({"cpu": "n/a", "cpuPercent": "33.5%"});
        assert_eq!(cpu_percent(&value), Some(33.5));
    }

    #[test]
    fn test_nested_cpu_paths() {
        assert_eq!(cpu_percent(&json!({"cpu": {"percent": 7.5}})), Some(7.5));
        assert_eq!(cpu_percent(&json!({"stats": {"cpu": 61}})), Some(61.0));
    }

    #[test]
    fn test_missing_cpu_is_absent_not_zero() {
        assert_eq!(cpu_percent(&json!({"memory": 10})), None);
        assert_eq!(cpu_percent(&json!({"cpu": -4.0})), None);
    }

    #[test]
    fn test_record_carries_catalog_fields() {
        let payload = json!([{"name": "p", "services": [{
            "name": "web",
            "cpuUsage": 81.0,
            "deploy": {"replicas": 3},
            "ports": [{"published": 8080}]
        }]}]);

        let record = &normalize(&payload).records[0];
        assert_eq!(record.cpu_percent, Some(81.0));
        assert_eq!(record.current_replicas, Some(3));
        assert_eq!(record.exposed_ports, Some(true));
    }

    #[test]
    fn test_service_without_metrics_is_unmeasurable_not_dropped() {
        let catalog = normalize(&json!([{"name": "p", "services": [{"name": "web"}]}]));
        let record = &catalog.records[0];
        assert_eq!(record.cpu_percent, None);
        assert_eq!(record.current_replicas, None);
        assert_eq!(record.exposed_ports, None);
    }

    #[test]
    fn test_replica_and_port_lookups() {
        assert_eq!(replica_count(&json!({"replicas": 2})), Some(2));
        assert_eq!(replica_count(&json!({"replicas": -1, "deploy": {"replicas": 4}})), Some(4));
        assert_eq!(exposed_ports(&json!({"exposedPorts": []})), Some(false));
        assert_eq!(exposed_ports(&json!({"ports": true})), Some(true));
        assert_eq!(exposed_ports(&json!({})), None);
    }

    #[test]
    fn test_unwrap_envelope_leaves_project_untouched() {
        let project = json!({"name": "p", "services": [], "data": {"json": 1}});
        assert_eq!(unwrap_envelope(&project), &project);
    }
}
