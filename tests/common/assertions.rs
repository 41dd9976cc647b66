// Custom assertions for integration tests

use cohort::graph::LineageGraphView;

/// Assert that a condition becomes true within a timeout
#[macro_export]
macro_rules! assert_eventually {
    ($cond:expr, $timeout_ms:expr) => {
        $crate::assert_eventually!(@ $cond, $timeout_ms, 10)
    };
    (@ $cond:expr, $timeout_ms:expr, $interval_ms:expr) => {{
        let start = std::time::Instant::now();
        let timeout = std::time::Duration::from_millis($timeout_ms);
        let interval = std::time::Duration::from_millis($interval_ms);

        while start.elapsed() < timeout {
            if $cond {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        assert!(
            $cond,
            "Condition did not become true within {:?}",
            timeout
        );
    }};
}

/// Assert that a duration is within acceptable bounds
#[macro_export]
macro_rules! assert_duration {
    ($duration:expr, $min_ms:expr, $max_ms:expr) => {
        let min = std::time::Duration::from_millis($min_ms);
        let max = std::time::Duration::from_millis($max_ms);
        assert!(
            $duration >= min && $duration <= max,
            "Expected duration {:?} to be between {:?} and {:?}",
            $duration,
            min,
            max
        );
    };
}

/// Whether the view has an edge of `edge_type` from `from` to `to`.
pub fn has_edge(view: &LineageGraphView, edge_type: &str, from: &str, to: &str) -> bool {
    view.edges
        .iter()
        .any(|e| e.edge_type == edge_type && e.source_guid == from && e.destination_guid == to)
}

/// Sorted guids of the vertices in a view.
pub fn vertex_guids(view: &LineageGraphView) -> Vec<String> {
    let mut guids: Vec<String> = view.vertices.iter().map(|v| v.guid.clone()).collect();
    guids.sort();
    guids
}
