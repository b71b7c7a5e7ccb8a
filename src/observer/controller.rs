use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};

use crate::convert::{Converter, HostMessage};
use crate::dom::{self, MutationRecord, Page};

use super::state::{
    ControllerSnapshot, ControllerStats, ControllerStatus, ScanOutcome, ScanSnapshot,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Toggle(bool),
    Shutdown,
}

/// Cloneable sender side for toggles coming from the popup.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControlCommand>,
}

impl ControllerHandle {
    pub fn set_enabled(&self, is_enabled: bool) -> Result<()> {
        self.send(ControlCommand::Toggle(is_enabled))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ControlCommand::Shutdown)
    }

    /// Route a decoded host message to the controller.
    pub fn deliver(&self, message: HostMessage) -> Result<()> {
        match message {
            HostMessage::ToggleEnabled { is_enabled } => self.set_enabled(is_enabled),
            HostMessage::ConvertText { .. } => bail!("convertText is answered by the background service"),
        }
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        if self.tx.send(command).is_err() {
            bail!("mutation controller is no longer running");
        }
        Ok(())
    }
}

enum Event {
    Command(Option<ControlCommand>),
    Mutation(Option<MutationRecord>),
    QuietWindowElapsed,
}

/// Debounced scan/convert/annotate loop for one page.
///
/// Observation is disconnected for the whole of a scan, so the controller's
/// own DOM writes never schedule another scan.
pub struct MutationController<C> {
    page: Rc<Page>,
    converter: C,
    quiet_window: Duration,
    status: ControllerStatus,
    enabled: bool,
    stopped: bool,
    /// Bumped on every toggle; a conversion started under an older epoch
    /// is never applied.
    epoch: u64,
    snapshot: Option<ScanSnapshot>,
    deadline: Option<Instant>,
    mutations: Option<mpsc::UnboundedReceiver<MutationRecord>>,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    deferred: VecDeque<ControlCommand>,
    stats: ControllerStats,
}

impl<C: Converter> MutationController<C> {
    pub fn new(page: Rc<Page>, converter: C, quiet_window: Duration) -> (Self, ControllerHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let controller = Self {
            page,
            converter,
            quiet_window,
            status: ControllerStatus::Idle,
            enabled: false,
            stopped: false,
            epoch: 0,
            snapshot: None,
            deadline: None,
            mutations: None,
            commands,
            deferred: VecDeque::new(),
            stats: ControllerStats::default(),
        };
        (controller, ControllerHandle { tx })
    }

    pub fn status(&self) -> ControllerStatus {
        self.status
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            status: self.status,
            enabled: self.enabled,
            observing: self.mutations.is_some(),
            stats: self.stats.clone(),
        }
    }

    /// Arm observation and schedule an immediate scan.
    pub fn enable(&mut self) {
        if self.status == ControllerStatus::ExtensionInvalid {
            log_info!("extension invalidated; ignoring enable");
            return;
        }
        self.epoch += 1;
        self.enabled = true;
        self.arm();
        self.deadline = Some(Instant::now());
    }

    /// Stop observing, drop any pending scan and strip every marker.
    pub fn disable(&mut self) {
        if self.status == ControllerStatus::ExtensionInvalid {
            log_info!("extension invalidated; ignoring disable");
            return;
        }
        self.epoch += 1;
        self.enabled = false;
        self.deadline = None;
        self.disarm();
        self.snapshot = None;
        let restored = dom::remove_highlights(&self.page);
        log_debug!("disabled; restored {restored} annotated nodes");
    }

    fn apply_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Toggle(is_enabled) if is_enabled == self.enabled => {
                log_debug!("already {}; toggle ignored", if is_enabled { "on" } else { "off" });
            }
            ControlCommand::Toggle(true) => self.enable(),
            ControlCommand::Toggle(false) => self.disable(),
            ControlCommand::Shutdown => self.stopped = true,
        }
    }

    fn drain_deferred(&mut self) {
        while let Some(command) = self.deferred.pop_front() {
            self.apply_command(command);
        }
    }

    fn arm(&mut self) {
        self.mutations = Some(self.page.observe());
    }

    fn disarm(&mut self) {
        self.page.disconnect();
        self.mutations = None;
    }

    fn on_mutation(&mut self, record: &MutationRecord) {
        if !self.enabled || self.status != ControllerStatus::Idle || !record.has_added_nodes() {
            return;
        }
        // each qualifying mutation restarts the quiet window
        self.deadline = Some(Instant::now() + self.quiet_window);
    }

    fn finish(&mut self) {
        self.status = ControllerStatus::Idle;
        if self.enabled {
            self.arm();
        }
    }

    fn invalidate(&mut self) {
        self.status = ControllerStatus::ExtensionInvalid;
        self.deadline = None;
        self.disarm();
        log_info!("extension context invalidated; observation stopped for this page");
    }

    /// Drive the controller until shut down or every handle is dropped.
    pub async fn run(mut self) -> Self {
        log_info!("mutation controller started (quiet window {:?})", self.quiet_window);

        while !self.stopped {
            let deadline = self.deadline;
            let event = tokio::select! {
                command = self.commands.recv() => Event::Command(command),
                record = next_record(&mut self.mutations) => Event::Mutation(record),
                _ = sleep_until_deadline(deadline) => Event::QuietWindowElapsed,
            };

            match event {
                Event::Command(Some(command)) => self.apply_command(command),
                Event::Command(None) => {
                    log_debug!("all controller handles dropped");
                    self.stopped = true;
                }
                Event::Mutation(Some(record)) => self.on_mutation(&record),
                Event::Mutation(None) => self.mutations = None,
                Event::QuietWindowElapsed => {
                    self.deadline = None;
                    let outcome = self.process_page().await;
                    log_debug!("scan finished: {outcome:?}");
                }
            }
        }

        self.disarm();
        log_info!("mutation controller stopped");
        self
    }

    /// One scan cycle: strip, scan, convert, annotate, re-arm.
    pub async fn process_page(&mut self) -> ScanOutcome {
        if !self.enabled || self.status != ControllerStatus::Idle {
            return ScanOutcome::Skipped;
        }

        self.status = ControllerStatus::Scanning;
        self.disarm();
        dom::remove_highlights(&self.page);

        let batch = dom::scan(&self.page.root());
        self.stats.scans += 1;
        self.stats.last_scan_at = Some(Utc::now());

        if batch.is_empty() {
            self.finish();
            return ScanOutcome::NothingToConvert;
        }

        if let Some(snapshot) = self.snapshot.as_ref().filter(|s| s.matches(&batch.text)) {
            let report = match &snapshot.converted {
                Some(converted) => dom::apply(&self.page, &batch.text, converted, &batch.owners),
                None => Default::default(),
            };
            self.stats.annotated_nodes += report.annotated as u64;
            self.finish();
            return ScanOutcome::Unchanged(report);
        }

        self.snapshot = Some(ScanSnapshot::new(batch.text.clone()));
        self.stats.conversions += 1;
        log_debug!("converting {} segments", batch.len());

        let epoch = self.epoch;
        let result = {
            let conversion = self.converter.convert(&batch.text);
            tokio::pin!(conversion);
            let mut listening = true;
            // where the queued toggles will leave the flag
            let mut pending_enabled = self.enabled;
            loop {
                tokio::select! {
                    result = &mut conversion => break result,
                    command = self.commands.recv(), if listening => match command {
                        Some(command) => {
                            if let ControlCommand::Toggle(is_enabled) = command {
                                if is_enabled != pending_enabled {
                                    pending_enabled = is_enabled;
                                    self.epoch += 1;
                                }
                            }
                            self.deferred.push_back(command);
                        }
                        None => listening = false,
                    },
                }
            }
        };

        let outcome = match result {
            Err(err) if err.is_channel_invalidated() => {
                self.invalidate();
                ScanOutcome::Invalidated
            }
            _ if self.epoch != epoch => {
                log_debug!("toggled while converting; dropping result");
                self.snapshot = None;
                self.status = ControllerStatus::Idle;
                ScanOutcome::Discarded
            }
            Ok(converted) => {
                let report = dom::apply(&self.page, &batch.text, &converted, &batch.owners);
                self.stats.annotated_nodes += report.annotated as u64;
                if let Some(snapshot) = self.snapshot.as_mut() {
                    snapshot.converted = Some(converted);
                }
                self.finish();
                ScanOutcome::Annotated(report)
            }
            Err(err) => {
                log_warn!("conversion failed, waiting for next mutation: {err}");
                // forget the batch so the next mutation retries it
                self.snapshot = None;
                self.finish();
                ScanOutcome::Failed(err.to_string())
            }
        };

        self.drain_deferred();
        outcome
    }
}

async fn next_record(
    mutations: &mut Option<mpsc::UnboundedReceiver<MutationRecord>>,
) -> Option<MutationRecord> {
    match mutations {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::sync::Notify;
    use tokio::task::LocalSet;

    use super::*;
    use crate::convert::{ConversionError, ConversionResult};
    use crate::dom::page::{create_text, element_with_children, tag_name, text_content};
    use crate::dom::HIGHLIGHT_CLASS;

    const QUIET: Duration = Duration::from_millis(200);

    /// Simplified -> traditional for a handful of characters, with optional
    /// scripted failures served first.
    #[derive(Clone, Default)]
    struct FakeConverter {
        calls: Arc<AtomicUsize>,
        failures: Arc<Mutex<VecDeque<ConversionError>>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeConverter {
        fn failing_with(errors: Vec<ConversionError>) -> Self {
            Self {
                failures: Arc::new(Mutex::new(errors.into())),
                ..Self::default()
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Converter for FakeConverter {
        async fn convert(&self, text: &str) -> ConversionResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(text
                .chars()
                .map(|c| match c {
                    '你' => '妳',
                    '软' => '軟',
                    '网' => '網',
                    other => other,
                })
                .collect())
        }
    }

    fn controller(
        html: &str,
        converter: FakeConverter,
    ) -> (Rc<Page>, MutationController<FakeConverter>, ControllerHandle) {
        let page = Rc::new(Page::parse(html));
        let (controller, handle) = MutationController::new(Rc::clone(&page), converter, QUIET);
        (page, controller, handle)
    }

    fn marker_count(page: &Page) -> usize {
        page.elements_with_class(HIGHLIGHT_CLASS).len()
    }

    fn append_paragraph(page: &Page, text: &str) {
        let p = element_with_children("p", &[], vec![create_text(text)]);
        page.append_child(&page.root(), p);
    }

    #[tokio::test]
    async fn scan_annotates_and_rearms() {
        let fake = FakeConverter::default();
        let (page, mut controller, _handle) = controller("<body><p>你好世界</p></body>", fake.clone());

        assert_eq!(controller.process_page().await, ScanOutcome::Skipped);
        controller.enable();

        let ScanOutcome::Annotated(report) = controller.process_page().await else {
            panic!("expected annotation");
        };
        assert_eq!(report.annotated, 1);
        assert_eq!(marker_count(&page), 1);
        assert_eq!(controller.status(), ControllerStatus::Idle);
        assert!(page.is_observed());
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn identical_batches_hit_the_service_once() {
        let fake = FakeConverter::default();
        let (page, mut controller, _handle) = controller("<body><p>软件</p></body>", fake.clone());
        controller.enable();

        assert!(matches!(controller.process_page().await, ScanOutcome::Annotated(_)));
        let second = controller.process_page().await;
        assert!(matches!(second, ScanOutcome::Unchanged(ref r) if r.annotated == 1), "{second:?}");
        assert_eq!(fake.calls(), 1);
        assert_eq!(marker_count(&page), 1);
        assert_eq!(controller.snapshot().stats.conversions, 1);
    }

    #[tokio::test]
    async fn pages_without_cjk_never_call_out() {
        let fake = FakeConverter::default();
        let (page, mut controller, _handle) = controller("<body><p>plain</p></body>", fake.clone());
        controller.enable();
        assert_eq!(controller.process_page().await, ScanOutcome::NothingToConvert);
        assert_eq!(fake.calls(), 0);
        assert!(page.is_observed());
    }

    #[tokio::test]
    async fn unchanged_conversion_touches_nothing() {
        let fake = FakeConverter::default();
        let (page, mut controller, _handle) = controller("<body><p>世界和平</p></body>", fake.clone());
        let before = page.to_html().unwrap();
        controller.enable();
        let outcome = controller.process_page().await;
        assert!(matches!(outcome, ScanOutcome::Annotated(ref r) if r.annotated == 0));
        assert_eq!(page.to_html().unwrap(), before);
    }

    #[tokio::test]
    async fn failure_rearms_and_next_pass_retries() {
        let fake = FakeConverter::failing_with(vec![ConversionError::Status(502)]);
        let (page, mut controller, _handle) = controller("<body><p>软件</p></body>", fake.clone());
        controller.enable();

        assert!(matches!(controller.process_page().await, ScanOutcome::Failed(_)));
        assert_eq!(controller.status(), ControllerStatus::Idle);
        assert!(page.is_observed());

        assert!(matches!(controller.process_page().await, ScanOutcome::Annotated(_)));
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn invalidated_channel_is_terminal() {
        let fake = FakeConverter::failing_with(vec![ConversionError::ChannelInvalidated]);
        let (page, mut controller, _handle) = controller("<body><p>软件</p></body>", fake.clone());
        controller.enable();

        assert_eq!(controller.process_page().await, ScanOutcome::Invalidated);
        assert_eq!(controller.status(), ControllerStatus::ExtensionInvalid);
        assert!(!page.is_observed());

        controller.enable();
        assert!(!page.is_observed());
        assert_eq!(controller.process_page().await, ScanOutcome::Skipped);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn disable_strips_markers_and_forgets_snapshot() {
        let fake = FakeConverter::default();
        let (page, mut controller, _handle) = controller("<body><p>软件</p></body>", fake.clone());
        let pristine = page.to_html().unwrap();
        controller.enable();
        controller.process_page().await;
        assert_eq!(marker_count(&page), 1);

        controller.disable();
        assert_eq!(page.to_html().unwrap(), pristine);
        assert!(!page.is_observed());

        controller.enable();
        assert!(matches!(controller.process_page().await, ScanOutcome::Annotated(_)));
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn own_annotations_do_not_retrigger_scans() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let fake = FakeConverter::default();
                let (page, controller, handle) =
                    controller("<body><p>你好</p></body>", fake.clone());
                let task = tokio::task::spawn_local(controller.run());

                handle.set_enabled(true).unwrap();
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(fake.calls(), 1);
                assert_eq!(marker_count(&page), 1);

                // nothing in scope changed: no new call, markers restored
                append_paragraph(&page, "plain text");
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(fake.calls(), 1);
                assert_eq!(marker_count(&page), 1);

                append_paragraph(&page, "网络");
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(fake.calls(), 2);
                assert_eq!(marker_count(&page), 2);

                handle.shutdown().unwrap();
                let controller = task.await.unwrap();
                assert_eq!(controller.snapshot().stats.conversions, 2);
                assert!(!page.is_observed());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_within_quiet_window_coalesce() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let fake = FakeConverter::default();
                let (page, controller, handle) =
                    controller("<body><p>你好</p></body>", fake.clone());
                tokio::task::spawn_local(controller.run());

                handle.set_enabled(true).unwrap();
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(fake.calls(), 1);

                for i in 0..5 {
                    append_paragraph(&page, &format!("软件{i}"));
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                assert_eq!(fake.calls(), 1);

                tokio::time::sleep(QUIET * 2).await;
                assert_eq!(fake.calls(), 2);
                assert_eq!(text_content(&page.root()), "你好软件0软件1软件2软件3软件4");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_off_mid_debounce_cancels_the_scan() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let fake = FakeConverter::default();
                let (page, controller, handle) =
                    controller("<body><p>你好</p></body>", fake.clone());
                tokio::task::spawn_local(controller.run());

                handle.set_enabled(true).unwrap();
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(fake.calls(), 1);

                append_paragraph(&page, "软件");
                tokio::time::sleep(QUIET / 2).await;
                handle.set_enabled(false).unwrap();
                tokio::time::sleep(Duration::from_secs(2)).await;

                assert_eq!(fake.calls(), 1);
                assert_eq!(marker_count(&page), 0);
                assert!(!page.is_observed());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_off_during_conversion_discards_the_result() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let gate = Arc::new(Notify::new());
                let fake = FakeConverter::gated(Arc::clone(&gate));
                let (page, controller, handle) =
                    controller("<body><p>你好</p></body>", fake.clone());
                let task = tokio::task::spawn_local(controller.run());

                handle.set_enabled(true).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert_eq!(fake.calls(), 1);

                handle.set_enabled(false).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                gate.notify_one();
                tokio::time::sleep(Duration::from_secs(1)).await;

                assert_eq!(marker_count(&page), 0);
                assert!(!page.is_observed());

                handle.shutdown().unwrap();
                let controller = task.await.unwrap();
                assert!(!controller.is_enabled());
                assert_eq!(controller.status(), ControllerStatus::Idle);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn removal_only_mutations_do_not_schedule_a_scan() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let fake = FakeConverter::default();
                let (page, controller, handle) =
                    controller("<body><p>你好</p><p>软件</p></body>", fake.clone());
                tokio::task::spawn_local(controller.run());

                handle.set_enabled(true).unwrap();
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(fake.calls(), 1);
                assert_eq!(marker_count(&page), 2);

                let last = page.root().children.borrow().last().cloned().unwrap();
                assert_eq!(tag_name(&last).as_deref(), Some("p"));
                assert!(page.remove_node(&last));
                tokio::time::sleep(Duration::from_secs(1)).await;

                assert_eq!(fake.calls(), 1);
                assert_eq!(marker_count(&page), 1);
                assert!(page.is_observed());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn redundant_commands_during_conversion_keep_the_result() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let gate = Arc::new(Notify::new());
                let fake = FakeConverter::gated(Arc::clone(&gate));
                let (page, controller, handle) =
                    controller("<body><p>你好</p></body>", fake.clone());
                let task = tokio::task::spawn_local(controller.run());

                handle.set_enabled(true).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert_eq!(fake.calls(), 1);

                handle.set_enabled(true).unwrap();
                handle.shutdown().unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                gate.notify_one();

                let controller = task.await.unwrap();
                assert_eq!(marker_count(&page), 1);
                assert_eq!(fake.calls(), 1);
                assert!(controller.is_enabled());
                assert_eq!(controller.snapshot().stats.conversions, 1);
            })
            .await;
    }

    #[test]
    fn handle_routes_host_messages() {
        let (_page, controller, handle) = controller("<body></body>", FakeConverter::default());
        let mut controller = controller;
        handle
            .deliver(HostMessage::ToggleEnabled { is_enabled: true })
            .unwrap();
        assert_eq!(
            controller.commands.try_recv().unwrap(),
            ControlCommand::Toggle(true)
        );
        assert!(handle
            .deliver(HostMessage::ConvertText { text: "x".into() })
            .is_err());

        drop(controller);
        assert!(handle.set_enabled(false).is_err());
    }
}
