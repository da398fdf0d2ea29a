//! Built-in expectations about the stack.

use stackcheck_clients::grafana::IgnoreLists;

/// Metrics every node must report, by exporter group.
pub const TARGET_METRICS: &[(&str, &[&str])] = &[
    ("cpu", &["node_cpu_seconds_total", "node_cpu_guest_seconds_total"]),
    (
        "mem",
        &[
            "node_memory_MemFree_bytes",
            "node_memory_Cached_bytes",
            "node_memory_Buffers_bytes",
            "node_memory_MemTotal_bytes",
            "node_memory_Active_bytes",
            "node_memory_MemAvailable_bytes",
            "node_memory_KernelStack_bytes",
        ],
    ),
    ("load", &["node_load1", "node_load5", "node_load15"]),
    (
        "disk",
        &[
            "node_filesystem_free_bytes",
            "node_filesystem_size_bytes",
            "node_filesystem_files_free",
            "node_filesystem_files",
        ],
    ),
    (
        "swap",
        &[
            "node_memory_SwapCached_bytes",
            "node_memory_SwapFree_bytes",
            "node_memory_SwapTotal_bytes",
        ],
    ),
    (
        "process",
        &[
            "process_cpu_seconds_total",
            "process_max_fds",
            "process_open_fds",
            "process_resident_memory_bytes",
            "process_start_time_seconds",
            "process_virtual_memory_bytes",
            "process_virtual_memory_max_bytes",
        ],
    ),
    (
        "network",
        &[
            "node_network_receive_errs_total",
            "node_network_transmit_errs_total",
            "node_network_receive_drop_total",
            "node_network_transmit_drop_total",
            "node_network_up",
        ],
    ),
    (
        "time",
        &[
            "node_timex_offset_seconds",
            "node_timex_sync_status",
            "node_timex_status",
        ],
    ),
    (
        "calico",
        &[
            "felix_int_dataplane_failures",
            "felix_ipset_errors",
            "felix_iptables_save_errors",
            "felix_iptables_restore_errors",
            "felix_int_dataplane_addr_msg_batch_size_sum",
            "felix_int_dataplane_addr_msg_batch_size_count",
            "felix_int_dataplane_iface_msg_batch_size_sum",
            "felix_int_dataplane_iface_msg_batch_size_count",
        ],
    ),
];

/// Grafana dashboards shipped with the stack, by title.
pub const DASHBOARDS: &[&str] = &[
    "Alertmanager",
    "Calico",
    "Elasticsearch",
    "Etcd Cluster",
    "Grafana",
    "Kubernetes Cluster",
    "Kubernetes Deployments",
    "Kubernetes Namespaces",
    "Kubernetes Pods",
    "Prometheus Performances",
    "Prometheus Stats",
    "System Disk I O",
    "System Networking",
    "System Overview",
];

/// Dashboards Grafana lists that are not expected in [`DASHBOARDS`].
pub const UNLISTED_DASHBOARDS: &[&str] = &["main"];

/// Panel queries that legitimately return nothing on a healthy stack.
const IGNORED_FOR_FAIL: &[&str] = &[
    // Visual baseline
    "0",
    // Only present after the first state change
    "keepalived_state{host=\"$host\"}",
    "keepalived_state{host=~\"$host\"}",
    // Only present when something is stopped
    "count(influxdb_up == 0)",
];

/// Panel queries that return data for only some variable values.
const IGNORED_FOR_PARTIAL_FAIL: &[&str] = &[
    "max(haproxy_server_ssl_connections {host=~\"$host\"}) without(pid) > 0",
    "max(haproxy_server_connections {host=~\"$host\"}) without(pid) > 0",
    "sum(kubernetes_pod_container_memory_working_set_bytes{host=~\"$host\"}) by (pod_name)",
    "kubernetes_pod_volume_used_bytes{host=~\"^$host$\"}",
];

/// The alert that must always fire.
pub const WATCHDOG: &str = "Watchdog";

/// Alerts allowed to fire when firing alerts are checked.
pub const EXPECTED_FIRING: &[&str] = &[WATCHDOG];

/// Expressions behind alerting rules. Each must return data unless its
/// alert is firing or pending.
pub const ALERT_EXPRESSIONS: &[(&str, &[&str])] = &[
    (
        "AlertmanagerAlertsInvalidWarning",
        &["increase(alertmanager_alerts_invalid_total[2m]) == 0"],
    ),
    (
        "AlertmanagerFailedReload",
        &["alertmanager_config_last_reload_successful != 0"],
    ),
    (
        "AlertmanagerMembersInconsistent",
        &["alertmanager_cluster_members == on(service) group_left() \
           count by(service) (alertmanager_cluster_members)"],
    ),
    (
        "AlertmanagerNotificationFailureWarning",
        &["increase(alertmanager_notifications_failed_total[2m]) == 0"],
    ),
    (
        "CalicoDatapaneIfaceMsgBatchSizeHigh",
        &[
            "felix_int_dataplane_iface_msg_batch_size_sum",
            "felix_int_dataplane_iface_msg_batch_size_count",
            "(felix_int_dataplane_iface_msg_batch_size_sum/\
             felix_int_dataplane_iface_msg_batch_size_count) <= 5",
        ],
    ),
    (
        "CalicoDataplaneAddressMsgBatchSizeHigh",
        &[
            "felix_int_dataplane_addr_msg_batch_size_sum",
            "felix_int_dataplane_addr_msg_batch_size_count",
            "(felix_int_dataplane_addr_msg_batch_size_sum/\
             felix_int_dataplane_addr_msg_batch_size_count) <= 5",
        ],
    ),
    (
        "CalicoDataplaneFailuresHigh",
        &[
            "felix_int_dataplane_failures",
            "increase(felix_int_dataplane_failures[1h]) <= 5",
        ],
    ),
    (
        "CalicoIPsetErrorsHigh",
        &["felix_ipset_errors", "increase(felix_ipset_errors[1h]) <= 5"],
    ),
    (
        "CalicoIptablesRestoreErrorsHigh",
        &[
            "felix_iptables_restore_errors",
            "increase(felix_iptables_restore_errors[1h]) <= 5",
        ],
    ),
    (
        "CalicoIptablesSaveErrorsHigh",
        &[
            "felix_iptables_save_errors",
            "increase(felix_iptables_save_errors[1h]) <= 5",
        ],
    ),
    (
        "PrometheusConfigReloadFailed",
        &["prometheus_config_last_reload_successful != 0"],
    ),
    (
        "PrometheusNotConnectedToAlertmanagers",
        &["prometheus_notifications_alertmanagers_discovered >= 1"],
    ),
    (
        "PrometheusNotIngestingSamples",
        &["rate(prometheus_tsdb_head_samples_appended_total[5m]) > 0"],
    ),
    (
        "PrometheusRuleEvaluationsFailed",
        &["rate(prometheus_rule_evaluation_failures_total[5m]) <= 0"],
    ),
    (
        "PrometheusTSDBWALCorruptions",
        &["prometheus_tsdb_wal_corruptions_total <= 0"],
    ),
];

/// Series Prometheus keeps for alerts that are pending.
pub const PENDING_ALERTS_QUERY: &str = "ALERTS{alertstate=\"pending\"}";

/// Saved Kibana dashboards, by title.
pub const KIBANA_DASHBOARDS: &[&str] = &["Audit", "K8S events", "Logs", "Notifications"];

/// Log index fields holding the shipping pod and node.
pub const POD_NAME_FIELD: &str = "kubernetes.pod_name";
pub const HOST_FIELD: &str = "kubernetes.host";

/// Bucket count for log source aggregations.
pub const TERMS_SIZE: u32 = 500;

/// Grafana slug of a dashboard title.
fn idfy(name: &str) -> String {
    name.to_lowercase()
        .replace(' ', "-")
        .replace(['(', ')'], "")
}

/// Slugs of [`DASHBOARDS`].
pub fn dashboard_slugs() -> Vec<String> {
    DASHBOARDS.iter().map(|name| idfy(name)).collect()
}

pub fn ignore_lists() -> IgnoreLists {
    IgnoreLists::new(
        IGNORED_FOR_FAIL.iter().copied(),
        IGNORED_FOR_PARTIAL_FAIL.iter().copied(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idfy_matches_grafana_slugs() {
        assert_eq!(idfy("System Disk I O"), "system-disk-i-o");
        assert_eq!(idfy("Ceph OSD (device)"), "ceph-osd-device");
    }

    #[test]
    fn alert_expressions_are_named_once() {
        let mut names: Vec<&str> = ALERT_EXPRESSIONS.iter().map(|(name, _)| *name).collect();
        let count = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), count);
        assert!(ALERT_EXPRESSIONS.iter().all(|(_, exprs)| !exprs.is_empty()));
    }

    #[test]
    fn continued_expressions_keep_a_single_space() {
        let (_, exprs) = ALERT_EXPRESSIONS
            .iter()
            .find(|(name, _)| *name == "AlertmanagerMembersInconsistent")
            .unwrap();
        assert_eq!(
            exprs[0],
            "alertmanager_cluster_members == on(service) group_left() count by(service) (alertmanager_cluster_members)"
        );
    }

    #[test]
    fn slugs_are_unique() {
        let mut slugs = dashboard_slugs();
        let count = slugs.len();
        slugs.sort();
        slugs.dedup();
        assert_eq!(slugs.len(), count);
    }

    #[test]
    fn ignore_lists_hold_raw_queries() {
        let lists = ignore_lists();
        assert!(lists.for_fail.contains("0"));
        assert!(
            lists
                .for_partial_fail
                .contains("kubernetes_pod_volume_used_bytes{host=~\"^$host$\"}")
        );
    }
}
