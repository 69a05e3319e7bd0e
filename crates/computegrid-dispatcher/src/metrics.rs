//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use crate::state::AppState;

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_task_metrics(state, &mut output);
    collect_pool_metrics(state, &mut output).await;
    collect_identity_metrics(state, &mut output).await;

    output
}

/// Task counters by status.
fn collect_task_metrics(state: &Arc<AppState>, output: &mut String) {
    let counters = state.dispatcher.counters();

    writeln!(
        output,
        "# HELP computegrid_tasks Current number of tasks by status"
    )
    .ok();
    writeln!(output, "# TYPE computegrid_tasks gauge").ok();
    writeln!(output, "computegrid_tasks{{status=\"queued\"}} {}", counters.queued).ok();
    writeln!(output, "computegrid_tasks{{status=\"running\"}} {}", counters.running).ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP computegrid_tasks_total Total number of tasks by outcome"
    )
    .ok();
    writeln!(output, "# TYPE computegrid_tasks_total counter").ok();
    writeln!(
        output,
        "computegrid_tasks_total{{status=\"submitted\"}} {}",
        counters.submitted
    )
    .ok();
    writeln!(
        output,
        "computegrid_tasks_total{{status=\"completed\"}} {}",
        counters.completed
    )
    .ok();
    writeln!(
        output,
        "computegrid_tasks_total{{status=\"failed\"}} {}",
        counters.failed
    )
    .ok();
    writeln!(
        output,
        "computegrid_tasks_total{{status=\"rejected\"}} {}",
        counters.rejected
    )
    .ok();
}

/// Worker pool and queue sizing.
async fn collect_pool_metrics(state: &Arc<AppState>, output: &mut String) {
    let dispatcher = &state.dispatcher;
    let stored = dispatcher.stored_results().await;

    writeln!(output).ok();
    writeln!(output, "# HELP computegrid_workers Number of dispatch workers").ok();
    writeln!(output, "# TYPE computegrid_workers gauge").ok();
    writeln!(output, "computegrid_workers {}", dispatcher.worker_count()).ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP computegrid_queue_capacity Maximum number of queued tasks"
    )
    .ok();
    writeln!(output, "# TYPE computegrid_queue_capacity gauge").ok();
    writeln!(
        output,
        "computegrid_queue_capacity {}",
        dispatcher.queue_capacity()
    )
    .ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP computegrid_results_stored Number of dispatch records held"
    )
    .ok();
    writeln!(output, "# TYPE computegrid_results_stored gauge").ok();
    writeln!(output, "computegrid_results_stored {stored}").ok();
}

/// Registered accounts and uptime.
async fn collect_identity_metrics(state: &Arc<AppState>, output: &mut String) {
    let users = state.identity.user_count().await;

    writeln!(output).ok();
    writeln!(output, "# HELP computegrid_users Number of registered accounts").ok();
    writeln!(output, "# TYPE computegrid_users gauge").ok();
    writeln!(output, "computegrid_users {users}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP computegrid_uptime_seconds Seconds since the dispatcher started"
    )
    .ok();
    writeln!(output, "# TYPE computegrid_uptime_seconds gauge").ok();
    writeln!(output, "computegrid_uptime_seconds {}", state.uptime_secs()).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use computegrid_kernels::default_registry;

    use crate::config::Config;
    use crate::identity::Principal;

    fn state() -> Arc<AppState> {
        let config = Config {
            worker_count: 3,
            queue_capacity: 8,
            token_secret: "test-secret".into(),
            ..Config::default()
        };
        AppState::from_config(&config, default_registry())
    }

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let output = collect_metrics(&state()).await;

        assert!(output.contains("computegrid_tasks{status=\"queued\"} 0"));
        assert!(output.contains("computegrid_tasks_total{status=\"completed\"} 0"));
        assert!(output.contains("computegrid_workers 3"));
        assert!(output.contains("computegrid_queue_capacity 8"));
        assert!(output.contains("computegrid_users 0"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts_queued_tasks() {
        // Workers are not started, so submissions stay queued.
        let state = state();
        state
            .dispatcher
            .submit(None, b"{}".to_vec(), &Principal::anonymous())
            .await
            .unwrap();
        state.identity.register("alice", "pw", None).await.unwrap();

        let output = collect_metrics(&state).await;
        assert!(output.contains("computegrid_tasks{status=\"queued\"} 1"));
        assert!(output.contains("computegrid_tasks_total{status=\"submitted\"} 1"));
        assert!(output.contains("computegrid_results_stored 1"));
        assert!(output.contains("computegrid_users 1"));
    }
}
