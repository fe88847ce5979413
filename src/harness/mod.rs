//! Load generator for plugin connections
//!
//! [`PluginTester`] drives one opened connection with either randomized events
//! (`do_test_start`, retrying failed calls) or one fixed payload repeated as fast as
//! possible (`do_test_start_for_speed`). Both finish with a single commit and report
//! elapsed time.

use crate::core::errors::{HarnessError, HarnessResult, PluginError, PluginResult};
use crate::driver::{
    self, ConnFun, EventType, ParamMap, PluginBinlog, PluginDataType, PluginState, SetParamArg,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub mod event_data;

pub use event_data::{EventSource, RandomEventSource};

/// Attempts per event before a randomized run gives up
pub const MAX_ATTEMPTS: u32 = 60;

/// Outcome of a finished run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub iterations: u64,
    /// Successful event calls, commits drawn by the randomized mode included
    pub operations: u64,
    /// Failed attempts that were retried
    pub retries: u64,
    pub elapsed: Duration,
    pub last_binlog: Option<PluginBinlog>,
}

impl RunReport {
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.operations as f64 / secs
        } else {
            0.0
        }
    }

    fn record(&mut self, binlog: Option<PluginBinlog>) {
        self.operations += 1;
        if binlog.is_some() {
            self.last_binlog = binlog;
        }
    }
}

/// Test driver for a single plugin connection
pub struct PluginTester {
    conn: Box<dyn ConnFun>,
    param: Option<ParamMap>,
    state: Option<PluginState>,
    event_type: Option<EventType>,
    debug: bool,
    source: Box<dyn EventSource>,
}

impl PluginTester {
    /// Open a connection through the global driver registry
    pub fn new(name: &str, uri: &str) -> HarnessResult<Self> {
        let conn = driver::open(name, uri).ok_or_else(|| HarnessError::DriverNotFound {
            name: name.to_string(),
        })?;
        Ok(Self::with_conn(conn))
    }

    /// Wrap an already opened connection
    pub fn with_conn(conn: Box<dyn ConnFun>) -> Self {
        Self {
            conn,
            param: None,
            state: None,
            event_type: None,
            debug: true,
            source: Box::new(RandomEventSource::new()),
        }
    }

    /// Store `param` and hand it to the plugin right away
    pub async fn set_param(&mut self, param: ParamMap) -> HarnessResult<()> {
        self.param = Some(param.clone());
        self.state = None;
        let state = self
            .conn
            .set_param(SetParamArg::Config(param))
            .await
            .map_err(|source| HarnessError::SetParam { source })?;
        self.state = Some(state);
        Ok(())
    }

    /// Use `event_type` for every iteration instead of a random draw
    pub fn set_event_type(&mut self, event_type: EventType) {
        self.event_type = Some(event_type);
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn set_event_source(&mut self, source: Box<dyn EventSource>) {
        self.source = source;
    }

    pub fn conn(&self) -> &dyn ConnFun {
        self.conn.as_ref()
    }

    /// Close the underlying connection
    pub async fn close(mut self) -> bool {
        self.conn.close().await
    }

    /// Randomized run of `n` events, unbounded when `n == 0`.
    ///
    /// Each event gets up to [`MAX_ATTEMPTS`] attempts; the last failure ends the run.
    pub async fn do_test_start(&mut self, n: u64) -> HarnessResult<RunReport> {
        if self.param.is_none() {
            return Err(HarnessError::ParamNotSet);
        }

        let timer = RunTimer::start();
        let mut report = RunReport::default();
        let result = self.run_randomized(n, &mut report).await;
        report.elapsed = timer.finish();
        result.map(|_| report)
    }

    /// Throughput run repeating one prebuilt event `n` times without retries.
    ///
    /// Needs a fixed insert, update, delete or query event type.
    pub async fn do_test_start_for_speed(&mut self, n: u64) -> HarnessResult<RunReport> {
        if self.param.is_none() {
            return Err(HarnessError::ParamNotSet);
        }

        let event_type = match self.event_type {
            Some(event_type) if event_type != EventType::Commit => event_type,
            _ => {
                return Err(HarnessError::config(
                    "event type must be insert, update, delete or query, call set_event_type first",
                ));
            }
        };
        let data = self.source.next_event(event_type);
        require_payload(event_type, data.as_ref())?;

        let timer = RunTimer::start();
        let mut report = RunReport::default();
        let result = self
            .run_speed(n, event_type, data.as_ref(), &mut report)
            .await;
        report.elapsed = timer.finish();
        if result.is_ok() {
            info!(
                "{} {} ops, {:.2} ops/s",
                report.operations,
                event_type,
                report.ops_per_second()
            );
        }
        result.map(|_| report)
    }

    async fn run_randomized(&mut self, n: u64, report: &mut RunReport) -> HarnessResult<()> {
        let mut i: u64 = 0;
        loop {
            if n > 0 && i >= n {
                break;
            }
            i += 1;
            report.iterations = i;

            self.refresh_param().await?;

            let event_type = match self.event_type {
                Some(event_type) => event_type,
                None => EventType::from_index(rand::thread_rng().gen_range(0..5)),
            };
            let data = self.source.next_event(event_type);
            require_payload(event_type, data.as_ref())?;

            self.execute_with_retry(i, n, event_type, data.as_ref(), report)
                .await?;
        }

        self.final_commit().await;
        Ok(())
    }

    async fn execute_with_retry(
        &mut self,
        iteration: u64,
        n: u64,
        event_type: EventType,
        data: Option<&PluginDataType>,
        report: &mut RunReport,
    ) -> HarnessResult<()> {
        let mut failures: u32 = 0;
        loop {
            if event_type == EventType::Commit && n == 0 {
                tokio::task::yield_now().await;
            }

            match apply(self.conn.as_mut(), event_type, data).await {
                Ok(binlog) => {
                    if self.debug {
                        info!(
                            "success({}) {} binlog: {:?} data: {}",
                            iteration,
                            event_type,
                            binlog,
                            describe(data)
                        );
                    }
                    report.record(binlog);
                    return Ok(());
                }
                Err(e) => {
                    warn!("err({}) {}: {} data: {}", failures, event_type, e, describe(data));
                    failures += 1;
                    if failures >= MAX_ATTEMPTS {
                        return Err(HarnessError::RetriesExhausted {
                            op: event_type.to_string(),
                            attempts: failures,
                            data: describe(data),
                            source: e,
                        });
                    }
                    report.retries += 1;
                }
            }
        }
    }

    async fn run_speed(
        &mut self,
        n: u64,
        event_type: EventType,
        data: Option<&PluginDataType>,
        report: &mut RunReport,
    ) -> HarnessResult<()> {
        let mut i: u64 = 0;
        loop {
            if n > 0 && i >= n {
                break;
            }
            i += 1;
            report.iterations = i;

            self.refresh_param().await?;

            let binlog = apply(self.conn.as_mut(), event_type, data)
                .await
                .map_err(|source| HarnessError::Operation {
                    op: event_type.to_string(),
                    data: describe(data),
                    source,
                })?;
            report.record(binlog);
        }

        self.final_commit().await;
        Ok(())
    }

    /// Pass the plugin its previous state, or the original params on first use
    async fn refresh_param(&mut self) -> HarnessResult<()> {
        let arg = match self.state.take() {
            Some(state) => SetParamArg::State(state),
            None => SetParamArg::Config(self.param.clone().ok_or(HarnessError::ParamNotSet)?),
        };
        let state = self
            .conn
            .set_param(arg)
            .await
            .map_err(|source| HarnessError::SetParam { source })?;
        self.state = Some(state);
        Ok(())
    }

    async fn final_commit(&mut self) {
        match self.conn.commit().await {
            Ok(binlog) => debug!("final commit binlog: {:?}", binlog),
            Err(e) => warn!("final commit failed: {}", e),
        }
    }
}

async fn apply(
    conn: &mut dyn ConnFun,
    event_type: EventType,
    data: Option<&PluginDataType>,
) -> PluginResult<Option<PluginBinlog>> {
    match (event_type, data) {
        (EventType::Commit, _) => conn.commit().await,
        (EventType::Insert, Some(data)) => conn.insert(data).await,
        (EventType::Update, Some(data)) => conn.update(data).await,
        (EventType::Delete, Some(data)) => conn.del(data).await,
        (EventType::Query, Some(data)) => conn.query(data).await,
        (event_type, None) => Err(PluginError::operation(format!(
            "{} event without payload",
            event_type
        ))),
    }
}

/// Row and query events must carry a payload, only commit goes without one
fn require_payload(event_type: EventType, data: Option<&PluginDataType>) -> HarnessResult<()> {
    if event_type != EventType::Commit && data.is_none() {
        return Err(HarnessError::config(format!(
            "event source produced no {} payload",
            event_type
        )));
    }
    Ok(())
}

fn describe(data: Option<&PluginDataType>) -> String {
    match data {
        Some(data) => data.to_string(),
        None => "nil".to_string(),
    }
}

/// Logs wall-clock start, end and elapsed milliseconds of a run
struct RunTimer {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunTimer {
    fn start() -> Self {
        let started_at = Utc::now();
        info!("startTime: {}", started_at.to_rfc3339());
        Self {
            started_at,
            started: Instant::now(),
        }
    }

    fn finish(self) -> Duration {
        let elapsed = self.started.elapsed();
        info!(
            "startTime: {} overTime: {} use: {}ms",
            self.started_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
            elapsed.as_millis()
        );
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, PluginParam};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    #[derive(Default)]
    struct Calls {
        insert: AtomicU64,
        update: AtomicU64,
        del: AtomicU64,
        query: AtomicU64,
        commit: AtomicU64,
        set_param: AtomicU64,
        failed: AtomicU64,
    }

    impl Calls {
        fn events(&self) -> u64 {
            self.insert.load(Ordering::SeqCst)
                + self.update.load(Ordering::SeqCst)
                + self.del.load(Ordering::SeqCst)
                + self.query.load(Ordering::SeqCst)
        }
    }

    /// Connection whose every event call fails while `fail_budget` lasts
    struct ScriptedConn {
        calls: Arc<Calls>,
        fail_budget: Arc<AtomicU32>,
        seen_states: Arc<AtomicU64>,
    }

    impl ScriptedConn {
        fn outcome(&self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
            let remaining = self.fail_budget.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_budget.store(remaining - 1, Ordering::SeqCst);
                self.calls.failed.fetch_add(1, Ordering::SeqCst);
                return Err(PluginError::connection("destination unavailable"));
            }
            Ok(Some(data.binlog()))
        }
    }

    #[async_trait]
    impl ConnFun for ScriptedConn {
        fn get_conn_status(&self) -> String {
            "running".to_string()
        }

        fn set_conn_status(&mut self, _status: &str) {}

        async fn connect(&mut self) -> bool {
            true
        }

        async fn reconnect(&mut self) -> bool {
            true
        }

        async fn heart_check(&mut self) {}

        async fn close(&mut self) -> bool {
            true
        }

        async fn insert(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
            self.calls.insert.fetch_add(1, Ordering::SeqCst);
            self.outcome(data)
        }

        async fn update(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
            self.calls.update.fetch_add(1, Ordering::SeqCst);
            self.outcome(data)
        }

        async fn del(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
            self.calls.del.fetch_add(1, Ordering::SeqCst);
            self.outcome(data)
        }

        async fn query(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
            self.calls.query.fetch_add(1, Ordering::SeqCst);
            self.outcome(data)
        }

        async fn set_param(&mut self, param: SetParamArg) -> PluginResult<PluginState> {
            self.calls.set_param.fetch_add(1, Ordering::SeqCst);
            let generation = match param {
                SetParamArg::Config(_) => 0_u64,
                SetParamArg::State(state) => {
                    let previous = state
                        .downcast::<u64>()
                        .map_err(|_| PluginError::invalid_param("unexpected state"))?;
                    self.seen_states.store(*previous, Ordering::SeqCst);
                    *previous + 1
                }
            };
            Ok(Box::new(generation))
        }

        async fn commit(&mut self) -> PluginResult<Option<PluginBinlog>> {
            self.calls.commit.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        fn get_plugin_param(&self) -> PluginParam {
            PluginParam::default()
        }
    }

    struct Fixture {
        calls: Arc<Calls>,
        fail_budget: Arc<AtomicU32>,
        seen_states: Arc<AtomicU64>,
    }

    impl Fixture {
        fn new(failures: u32) -> Self {
            Self {
                calls: Arc::new(Calls::default()),
                fail_budget: Arc::new(AtomicU32::new(failures)),
                seen_states: Arc::new(AtomicU64::new(0)),
            }
        }

        fn conn(&self) -> Box<dyn ConnFun> {
            Box::new(ScriptedConn {
                calls: self.calls.clone(),
                fail_budget: self.fail_budget.clone(),
                seen_states: self.seen_states.clone(),
            })
        }

        async fn tester(&self) -> PluginTester {
            let mut tester = PluginTester::with_conn(self.conn());
            tester.set_debug(false);
            tester
                .set_param(ParamMap::from([("table".to_string(), "t1".into())]))
                .await
                .unwrap();
            tester
        }
    }

    #[tokio::test]
    async fn test_fixed_type_counts() {
        let fixture = Fixture::new(0);
        let mut tester = fixture.tester().await;
        tester.set_event_type(EventType::Insert);

        let report = tester.do_test_start(5).await.unwrap();

        assert_eq!(fixture.calls.insert.load(Ordering::SeqCst), 5);
        assert_eq!(fixture.calls.events(), 5);
        assert_eq!(fixture.calls.commit.load(Ordering::SeqCst), 1);
        assert_eq!(report.iterations, 5);
        assert_eq!(report.operations, 5);
        assert_eq!(report.retries, 0);
        assert!(report.last_binlog.is_some());
    }

    #[tokio::test]
    async fn test_random_run_counts() {
        let fixture = Fixture::new(0);
        let mut tester = fixture.tester().await;

        let report = tester.do_test_start(5).await.unwrap();

        let commits = fixture.calls.commit.load(Ordering::SeqCst);
        assert_eq!(fixture.calls.events() + commits, 6);
        assert!(commits >= 1);
        assert_eq!(report.operations, 5);
        assert_eq!(report.retries, 0);
        assert_eq!(fixture.calls.failed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_param_state_threaded_through() {
        let fixture = Fixture::new(0);
        let mut tester = fixture.tester().await;
        tester.set_event_type(EventType::Update);

        tester.do_test_start(3).await.unwrap();

        // one Config call from set_param, then three State refreshes
        assert_eq!(fixture.calls.set_param.load(Ordering::SeqCst), 4);
        assert_eq!(fixture.seen_states.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_recovers_after_59_failures() {
        let fixture = Fixture::new(MAX_ATTEMPTS - 1);
        let mut tester = fixture.tester().await;
        tester.set_event_type(EventType::Delete);

        let report = tester.do_test_start(2).await.unwrap();

        assert_eq!(fixture.calls.del.load(Ordering::SeqCst), 61);
        assert_eq!(report.operations, 2);
        assert_eq!(report.retries, 59);
        assert_eq!(fixture.calls.commit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_aborts_after_60_failures() {
        let fixture = Fixture::new(MAX_ATTEMPTS);
        let mut tester = fixture.tester().await;
        tester.set_event_type(EventType::Insert);

        let err = tester.do_test_start(3).await.unwrap_err();

        match &err {
            HarnessError::RetriesExhausted { op, attempts, data, .. } => {
                assert_eq!(op, "insert");
                assert_eq!(*attempts, 60);
                assert!(data.contains("\"event_type\":\"insert\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.plugin_error(), Some(PluginError::Connection { .. })));
        assert_eq!(fixture.calls.insert.load(Ordering::SeqCst), 60);
        assert_eq!(fixture.calls.commit.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_requires_param() {
        let fixture = Fixture::new(0);
        let mut tester = PluginTester::with_conn(fixture.conn());

        assert!(matches!(
            tester.do_test_start(1).await,
            Err(HarnessError::ParamNotSet)
        ));
        assert!(matches!(
            tester.do_test_start_for_speed(1).await,
            Err(HarnessError::ParamNotSet)
        ));
        assert_eq!(fixture.calls.events(), 0);
    }

    #[tokio::test]
    async fn test_speed_requires_event_type() {
        let fixture = Fixture::new(0);
        let mut tester = fixture.tester().await;

        let err = tester.do_test_start_for_speed(10).await.unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));

        tester.set_event_type(EventType::Commit);
        let err = tester.do_test_start_for_speed(10).await.unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));

        assert_eq!(fixture.calls.events(), 0);
        assert_eq!(fixture.calls.commit.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_speed_run_reuses_payload() {
        let fixture = Fixture::new(0);
        let mut tester = fixture.tester().await;
        tester.set_event_type(EventType::Query);

        let report = tester.do_test_start_for_speed(20).await.unwrap();

        assert_eq!(fixture.calls.query.load(Ordering::SeqCst), 20);
        assert_eq!(fixture.calls.commit.load(Ordering::SeqCst), 1);
        assert_eq!(report.operations, 20);
        assert!(report.last_binlog.unwrap().binlog_position > 4);
    }

    #[tokio::test]
    async fn test_speed_run_aborts_on_first_failure() {
        let fixture = Fixture::new(1);
        let mut tester = fixture.tester().await;
        tester.set_event_type(EventType::Update);

        let err = tester.do_test_start_for_speed(10).await.unwrap_err();

        match &err {
            HarnessError::Operation { op, data, .. } => {
                assert_eq!(op, "update");
                assert!(data.contains("\"event_type\":\"update\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("destination unavailable"));
        assert_eq!(fixture.calls.update.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.calls.commit.load(Ordering::SeqCst), 0);
    }

    /// Source that never produces a payload
    struct EmptySource;

    impl EventSource for EmptySource {
        fn insert_data(&mut self) -> PluginDataType {
            PluginDataType::default()
        }

        fn update_data(&mut self) -> PluginDataType {
            PluginDataType::default()
        }

        fn delete_data(&mut self) -> PluginDataType {
            PluginDataType::default()
        }

        fn query_data(&mut self) -> PluginDataType {
            PluginDataType::default()
        }

        fn next_event(&mut self, _event_type: EventType) -> Option<PluginDataType> {
            None
        }
    }

    #[tokio::test]
    async fn test_missing_payload_is_not_a_commit() {
        let fixture = Fixture::new(0);
        let mut tester = fixture.tester().await;
        tester.set_event_source(Box::new(EmptySource));
        tester.set_event_type(EventType::Insert);

        let err = tester.do_test_start(3).await.unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));

        let err = tester.do_test_start_for_speed(3).await.unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));

        assert_eq!(fixture.calls.events(), 0);
        assert_eq!(fixture.calls.commit.load(Ordering::SeqCst), 0);
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    async fn success_lines(debug: bool) -> usize {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let fixture = Fixture::new(0);
        let mut tester = fixture.tester().await;
        tester.set_debug(debug);
        tester.set_event_type(EventType::Insert);
        tester.do_test_start(3).await.unwrap();

        let output = String::from_utf8(capture.0.lock().clone()).unwrap();
        output.lines().filter(|line| line.contains("success(")).count()
    }

    #[tokio::test]
    async fn test_debug_logs_each_success_at_info() {
        assert_eq!(success_lines(true).await, 3);
        assert_eq!(success_lines(false).await, 0);
    }

    struct ScriptedDriver {
        fixture: Fixture,
    }

    impl Driver for ScriptedDriver {
        fn open(&self, _uri: &str) -> Box<dyn ConnFun> {
            self.fixture.conn()
        }

        fn get_uri_example(&self) -> String {
            "scripted://".to_string()
        }

        fn check_uri(&self, _uri: &str) -> PluginResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_new_opens_through_registry() {
        let calls = Arc::new(Calls::default());
        let fixture = Fixture {
            calls: calls.clone(),
            fail_budget: Arc::new(AtomicU32::new(0)),
            seen_states: Arc::new(AtomicU64::new(0)),
        };
        driver::register(
            "harness-test-scripted",
            Arc::new(ScriptedDriver { fixture }),
            "v0.0.1",
        );

        let mut tester = PluginTester::new("harness-test-scripted", "scripted://").unwrap();
        tester.set_param(ParamMap::new()).await.unwrap();
        tester.set_event_type(EventType::Insert);
        tester.do_test_start(2).await.unwrap();
        assert_eq!(calls.insert.load(Ordering::SeqCst), 2);

        assert!(matches!(
            PluginTester::new("harness-test-missing", "x"),
            Err(HarnessError::DriverNotFound { .. })
        ));
    }
}
