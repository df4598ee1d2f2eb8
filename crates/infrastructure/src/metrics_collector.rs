//! Metrics collector for the task scheduler
//!
//! Thin wrapper over the `metrics` facade. Components receive an
//! `Arc<MetricsCollector>` at construction; without an installed recorder
//! every call is a no-op.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

pub struct MetricsCollector {
    // Task lifecycle metrics
    tasks_dispatched_total: Counter,
    task_executions_total: Counter,
    task_execution_duration: Histogram,
    task_failures_total: Counter,
    task_retries_total: Counter,
    task_timeouts_total: Counter,

    // Scheduler state
    queue_depth: Gauge,
    running_tasks: Gauge,
    cron_entries: Gauge,

    // Ingestion metrics
    events_received_total: Counter,
    events_converted_total: Counter,
    events_dropped_total: Counter,
    config_refresh_total: Counter,
    config_refresh_failures_total: Counter,
    routing_configurations: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_dispatched_total: counter!("scheduler_tasks_dispatched_total"),
            task_executions_total: counter!("scheduler_task_executions_total"),
            task_execution_duration: histogram!("scheduler_task_execution_duration_seconds"),
            task_failures_total: counter!("scheduler_task_failures_total"),
            task_retries_total: counter!("scheduler_task_retries_total"),
            task_timeouts_total: counter!("scheduler_task_timeouts_total"),
            queue_depth: gauge!("scheduler_queue_depth"),
            running_tasks: gauge!("scheduler_running_tasks"),
            cron_entries: gauge!("scheduler_cron_entries"),
            events_received_total: counter!("scheduler_events_received_total"),
            events_converted_total: counter!("scheduler_events_converted_total"),
            events_dropped_total: counter!("scheduler_events_dropped_total"),
            config_refresh_total: counter!("scheduler_config_refresh_total"),
            config_refresh_failures_total: counter!("scheduler_config_refresh_failures_total"),
            routing_configurations: gauge!("scheduler_routing_configurations"),
        }
    }

    // Task lifecycle metrics

    pub fn record_dispatch(&self, count: usize) {
        self.tasks_dispatched_total.increment(count as u64);
    }

    /// Record a finished handler run, successful or not
    pub fn record_task_execution(&self, duration_seconds: f64) {
        self.task_executions_total.increment(1);
        self.task_execution_duration.record(duration_seconds);
    }

    pub fn record_task_failure(&self) {
        self.task_failures_total.increment(1);
    }

    pub fn record_task_retry(&self) {
        self.task_retries_total.increment(1);
    }

    pub fn record_task_timeout(&self) {
        self.task_timeouts_total.increment(1);
    }

    // Scheduler state

    pub fn update_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    pub fn update_running_tasks(&self, running: usize) {
        self.running_tasks.set(running as f64);
    }

    pub fn update_cron_entries(&self, entries: usize) {
        self.cron_entries.set(entries as f64);
    }

    // Ingestion metrics

    pub fn record_event_received(&self) {
        self.events_received_total.increment(1);
    }

    pub fn record_event_converted(&self) {
        self.events_converted_total.increment(1);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped_total.increment(1);
    }

    pub fn record_config_refresh(&self, success: bool, configurations: usize) {
        if success {
            self.config_refresh_total.increment(1);
            self.routing_configurations.set(configurations as f64);
        } else {
            self.config_refresh_failures_total.increment(1);
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
