use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{AppConfig, DownloadSettings};
use crate::downloader::progress::{self, ProgressScanner, SimulationFlags};
use crate::downloader::{artifacts, command, process};
use crate::downloader::{Job, JobStatus, LinkState, ProgressEvent};

/// Orchestrates download jobs keyed by link: start, cancel, status queries
/// and live progress subscriptions. One worker thread runs per active job;
/// all shared state sits behind a single registry lock that is only ever
/// held for short, non-blocking sections.
#[derive(Clone)]
pub struct DownloadManager {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
    config: Arc<AppConfig>,
    scanner: Arc<ProgressScanner>,
}

/// Live progress feed for one link. Events arrive in non-decreasing
/// progress order while a download runs; the channel closes after the
/// terminal event. Dropping the subscription detaches the listener.
pub struct ProgressSubscription {
    link: String,
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
    manager: DownloadManager,
}

impl ProgressSubscription {
    /// Next event, or None once the feed is finished.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.manager.unsubscribe(&self.link, self.id);
    }
}

impl DownloadManager {
    pub fn new(config: AppConfig) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
            scanner: Arc::new(ProgressScanner::new()),
        }
    }

    /// Starts a download for `link`. Returns false without touching
    /// existing state when the link is already downloading or done, or while
    /// a worker from an earlier start is still winding down. A cancel
    /// recorded while the link was idle is spent by the refusal; one aimed
    /// at a live run stays armed for that run to honor.
    pub fn start(&self, link: &str, settings: DownloadSettings) -> bool {
        let accepted = {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.entry(link.to_string()).or_insert_with(Job::new);

            if job.worker_in_flight
                || matches!(job.status, JobStatus::Downloading | JobStatus::Done)
            {
                false
            } else if job.cancel_requested {
                job.cancel_requested = false;
                log::info!("Ignoring start for {}: cancelled before launch", link);
                false
            } else {
                job.worker_in_flight = true;
                job.status = JobStatus::Downloading;
                job.progress = 0.0;
                job.settings = settings;
                job.process_group = None;
                job.downloaded_artifact = None;
                job.started_at = Some(chrono::Utc::now());
                job.completed_at = None;
                Self::publish_locked(link, job);
                true
            }
        };

        if accepted {
            let manager = self.clone();
            let link = link.to_string();
            tokio::task::spawn_blocking(move || manager.run_worker(&link));
        }
        accepted
    }

    /// Cancels `link`. Always succeeds. Cancelling something that has no
    /// running process records the intent so an in-flight start aborts
    /// instead of racing the kill; an active process group is terminated
    /// on a detached thread so this returns promptly.
    pub fn cancel(&self, link: &str) -> bool {
        let group = {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.entry(link.to_string()).or_insert_with(Job::new);

            job.cancel_requested = true;
            job.status = JobStatus::Idle;
            job.progress = 0.0;
            let group = job.process_group.take();
            Self::publish_locked(link, job);
            group
        };

        match group {
            Some(pgid) => {
                log::info!("Cancelling download: {} (group {})", link, pgid);
                process::terminate_group_detached(pgid);
            }
            None => log::info!("Cancel recorded for {}", link),
        }
        true
    }

    /// Current `{status, progress}` per queried link. Unknown links read as
    /// idle. A done entry is only reported as done while its recorded file
    /// is still on disk; a done claim with no file behind it reverts to
    /// idle so the track can be fetched again.
    pub fn status(&self, links: &[String]) -> HashMap<String, LinkState> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut states = HashMap::with_capacity(links.len());

        for link in links {
            let state = match jobs.get_mut(link) {
                Some(job) => {
                    if job.status == JobStatus::Done && !self.artifact_on_disk(job) {
                        log::warn!(
                            "No file on disk for finished {} (completed {:?}), resetting to idle",
                            link,
                            job.completed_at
                        );
                        job.status = JobStatus::Idle;
                        job.progress = 0.0;
                        job.downloaded_artifact = None;
                    }
                    LinkState {
                        status: job.status,
                        progress: job.progress,
                    }
                }
                None => LinkState::idle(),
            };
            states.insert(link.clone(), state);
        }
        states
    }

    /// Registers a live listener for `link`. The current state is delivered
    /// immediately; when that snapshot is already terminal the channel
    /// closes right after it.
    pub fn subscribe(&self, link: &str) -> ProgressSubscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.entry(link.to_string()).or_insert_with(Job::new);

            let snapshot = ProgressEvent {
                link: link.to_string(),
                progress: job.progress,
                complete: job.status.is_terminal(),
                status: job.status,
            };
            let _ = tx.send(snapshot);

            if !job.status.is_terminal() {
                job.subscribers.insert(id, tx);
            }
        }

        ProgressSubscription {
            link: link.to_string(),
            id,
            receiver,
            manager: self.clone(),
        }
    }

    pub fn unsubscribe(&self, link: &str, id: Uuid) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(link) {
            job.subscribers.remove(&id);
        }
    }

    /// One download from spawn to finalization. Runs on its own worker
    /// thread; the registry lock is taken only for brief state flips.
    fn run_worker(&self, link: &str) {
        log::info!("Starting download: {}", link);

        // The snapshot taken when the start was accepted drives this run,
        // regardless of what later requests carry.
        let settings = {
            let jobs = self.jobs.lock().unwrap();
            match jobs.get(link) {
                Some(job) => job.settings.clone(),
                None => return,
            }
        };

        let argv = match command::build_command(link, &settings, &self.config) {
            Ok(argv) => argv,
            Err(err) => {
                log::error!("Could not build downloader command for {}: {}", link, err);
                self.finalize_spawn_failure(link);
                return;
            }
        };

        let mut child = match process::spawn_group(&argv) {
            Ok(child) => child,
            Err(err) => {
                log::error!("Failed to launch downloader for {}: {}", link, err);
                self.finalize_spawn_failure(link);
                return;
            }
        };
        let pgid = process::group_id(&child);

        // A cancel may have landed between accepting the start and the
        // spawn; it could not kill anything yet, so honor it here.
        let cancelled_early = {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.entry(link.to_string()).or_insert_with(Job::new);
            if job.cancel_requested {
                true
            } else {
                job.process_group = Some(pgid);
                false
            }
        };
        if cancelled_early {
            process::terminate_group(pgid);
            let exit = child.wait();
            self.finalize(link, pgid, exit, None);
            return;
        }

        let flags = Arc::new(SimulationFlags::default());

        let stderr_reader = child.stderr.take().map(|stream| {
            let manager = self.clone();
            let link = link.to_string();
            let flags = Arc::clone(&flags);
            std::thread::spawn(move || {
                process::stream_lines(stream, |line| {
                    manager.handle_output_line(&link, line, &flags)
                });
            })
        });

        let simulator = {
            let manager = self.clone();
            let link = link.to_string();
            let flags = Arc::clone(&flags);
            std::thread::spawn(move || {
                progress::run_simulation(&flags, |value| manager.push_progress(&link, value));
            })
        };

        if let Some(stream) = child.stdout.take() {
            process::stream_lines(stream, |line| self.handle_output_line(link, line, &flags));
        }

        let exit = child.wait();
        flags.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = stderr_reader {
            let _ = reader.join();
        }
        let _ = simulator.join();

        let artifact = match &exit {
            Ok(status) if status.success() => {
                artifacts::newest_audio_file(&self.config.download_dir)
            }
            _ => None,
        };
        self.finalize(link, pgid, exit, artifact);
    }

    /// One line of downloader output: log it, feed the scanner, and apply
    /// whatever floor or percentage it yielded.
    fn handle_output_line(&self, link: &str, line: &str, flags: &SimulationFlags) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        log::debug!("[spotdl] {}", line);

        let signal = self.scanner.scan(line);
        if signal.accelerate {
            flags.accelerate.store(true, Ordering::Relaxed);
        }
        if signal.percent.is_some() {
            flags.real_signal.store(true, Ordering::Relaxed);
        }

        if let Some(floor) = signal.floor {
            self.push_progress(link, floor);
        }
        if let Some(percent) = signal.percent {
            self.push_progress(link, percent);
        }
    }

    /// Single update path for progress: keeps the furthest-along signal and
    /// notifies subscribers. Values only move while the job is downloading,
    /// so late simulation ticks after a cancel or exit change nothing.
    fn push_progress(&self, link: &str, value: f32) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = match jobs.get_mut(link) {
            Some(job) => job,
            None => return,
        };

        if job.status != JobStatus::Downloading {
            return;
        }
        let value = value.clamp(0.0, 100.0);
        if value <= job.progress {
            return;
        }
        job.progress = value;
        Self::publish_locked(link, job);
    }

    /// Settles the job after its child exited. The outcome only applies
    /// while this worker still owns the job; a cancel hands ownership away,
    /// in which case the exit is just the kill being reaped and the idle
    /// reset already published stands. Starts are refused while the worker
    /// is in flight, so a cancel flag seen here was aimed at this run and
    /// is consumed with it.
    fn finalize(
        &self,
        link: &str,
        pgid: i32,
        exit: std::io::Result<std::process::ExitStatus>,
        artifact: Option<String>,
    ) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = match jobs.get_mut(link) {
            Some(job) => job,
            None => return,
        };

        let owns_job = job.process_group == Some(pgid) && !job.cancel_requested;
        job.cancel_requested = false;
        job.worker_in_flight = false;
        if job.process_group == Some(pgid) {
            job.process_group = None;
        }
        if !owns_job {
            log::info!("Download cancelled: {}", link);
            return;
        }

        let finished = chrono::Utc::now();
        match exit {
            Ok(status) if status.success() => {
                job.status = JobStatus::Done;
                job.progress = 100.0;
                job.downloaded_artifact = artifact;
                if let Some(started) = job.started_at {
                    let secs = (finished - started).num_milliseconds() as f64 / 1000.0;
                    log::info!("Download finished: {} ({:.1}s)", link, secs);
                }
            }
            Ok(status) => {
                job.status = JobStatus::Error;
                log::error!("Download failed for {} with {}", link, status);
            }
            Err(err) => {
                job.status = JobStatus::Error;
                log::error!("Download failed for {}: {}", link, err);
            }
        }
        job.completed_at = Some(finished);

        Self::publish_locked(link, job);
        job.subscribers.clear();
    }

    /// Command construction or spawn failed before any process existed.
    fn finalize_spawn_failure(&self, link: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(link) {
            job.worker_in_flight = false;
            if job.cancel_requested {
                job.cancel_requested = false;
                return;
            }
            job.status = JobStatus::Error;
            job.completed_at = Some(chrono::Utc::now());
            Self::publish_locked(link, job);
            job.subscribers.clear();
        }
    }

    fn artifact_on_disk(&self, job: &Job) -> bool {
        job.downloaded_artifact
            .as_deref()
            .map(|name| artifacts::artifact_exists(&self.config.download_dir, name))
            .unwrap_or(false)
    }

    /// Sends `job`'s current state to every listener, dropping the ones
    /// whose receiving side has gone away. Called with the registry lock
    /// held, which is what keeps per-link delivery in order.
    fn publish_locked(link: &str, job: &mut Job) {
        if job.subscribers.is_empty() {
            return;
        }
        let event = ProgressEvent {
            link: link.to_string(),
            progress: job.progress,
            complete: job.status.is_terminal(),
            status: job.status,
        };
        job.subscribers.retain(|id, tx| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                log::debug!("Dropping closed progress listener {} for {}", id, link);
            }
            alive
        });
    }
}


#[cfg(all(test, unix))]
mod worker_tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const LINK: &str = "https://open.spotify.com/track/abc123";

    /// Builds a manager whose downloader is a shell script. The script sees
    /// the real argument vector, so `$4` is the output path and its
    /// directory is where artifacts belong.
    fn manager_with_script(dir: &TempDir, script: &str) -> DownloadManager {
        let tool = dir.path().join("fake-spotdl.sh");
        fs::write(&tool, format!("#!/bin/sh\n{}\n", script)).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        DownloadManager::new(AppConfig {
            download_dir: dir.path().join("out"),
            port: 0,
            spotdl_path: tool.to_string_lossy().into_owned(),
            defaults: DownloadSettings::default(),
        })
    }

    async fn wait_for_status(
        manager: &DownloadManager,
        link: &str,
        wanted: JobStatus,
    ) -> LinkState {
        for _ in 0..200 {
            let states = manager.status(&[link.to_string()]);
            if states[link].status == wanted {
                return states[link];
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job for {} never reached {:?}", link, wanted);
    }

    fn registered_group(manager: &DownloadManager, link: &str) -> Option<i32> {
        manager
            .jobs
            .lock()
            .unwrap()
            .get(link)
            .and_then(|job| job.process_group)
    }

    fn cancel_pending(manager: &DownloadManager, link: &str) -> bool {
        manager
            .jobs
            .lock()
            .unwrap()
            .get(link)
            .map(|job| job.cancel_requested)
            .unwrap_or(false)
    }

    fn worker_active(manager: &DownloadManager, link: &str) -> bool {
        manager
            .jobs
            .lock()
            .unwrap()
            .get(link)
            .map(|job| job.worker_in_flight)
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn successful_run_finishes_at_exactly_100() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"echo "Progress: 12%"
printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        assert!(manager.start(LINK, DownloadSettings::default()));
        let state = wait_for_status(&manager, LINK, JobStatus::Done).await;
        assert_eq!(state.progress, 100.0);

        // Done stays done while the file is in place
        let again = manager.status(&[LINK.to_string()]);
        assert_eq!(again[LINK].status, JobStatus::Done);
    }

    #[tokio::test]
    async fn failed_run_goes_error_with_progress_frozen() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"echo "Progress: 37%"
exit 3"#,
        );

        assert!(manager.start(LINK, DownloadSettings::default()));
        let state = wait_for_status(&manager, LINK, JobStatus::Error).await;
        assert_eq!(state.progress, 37.0);

        let again = manager.status(&[LINK.to_string()]);
        assert_eq!(again[LINK].progress, 37.0);
    }

    #[tokio::test]
    async fn missing_tool_goes_error_and_notifies_subscribers() {
        let dir = tempdir().unwrap();
        let manager = DownloadManager::new(AppConfig {
            download_dir: dir.path().join("out"),
            port: 0,
            spotdl_path: dir
                .path()
                .join("no-such-spotdl")
                .to_string_lossy()
                .into_owned(),
            defaults: DownloadSettings::default(),
        });

        let mut subscription = manager.subscribe(LINK);
        assert!(manager.start(LINK, DownloadSettings::default()));

        let state = wait_for_status(&manager, LINK, JobStatus::Error).await;
        assert_eq!(state.progress, 0.0);

        let mut last = None;
        while let Some(event) = subscription.recv().await {
            last = Some(event);
        }
        let last = last.unwrap();
        assert!(last.complete);
        assert_eq!(last.status, JobStatus::Error);
        assert_eq!(last.progress, 0.0);

        // The failed run released the link, so a retry is accepted
        assert!(manager.start(LINK, DownloadSettings::default()));
    }

    #[tokio::test]
    async fn start_is_refused_while_downloading() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(&dir, "exec sleep 30");

        assert!(manager.start(LINK, DownloadSettings::default()));
        assert!(!manager.start(LINK, DownloadSettings::default()));

        let states = manager.status(&[LINK.to_string()]);
        assert_eq!(states[LINK].status, JobStatus::Downloading);

        manager.cancel(LINK);
    }

    #[tokio::test]
    async fn simultaneous_starts_accept_exactly_one() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(&dir, "exec sleep 30");

        let mut attempts = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            attempts.push(tokio::spawn(async move {
                manager.start(LINK, DownloadSettings::default())
            }));
        }

        let mut accepted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        manager.cancel(LINK);
    }

    #[tokio::test]
    async fn start_is_refused_when_already_done() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        assert!(manager.start(LINK, DownloadSettings::default()));
        wait_for_status(&manager, LINK, JobStatus::Done).await;

        assert!(!manager.start(LINK, DownloadSettings::default()));
        let states = manager.status(&[LINK.to_string()]);
        assert_eq!(states[LINK].status, JobStatus::Done);
        assert_eq!(states[LINK].progress, 100.0);
    }

    #[tokio::test]
    async fn cancel_kills_the_group_and_resets_to_idle() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(&dir, "exec sleep 30");

        assert!(manager.start(LINK, DownloadSettings::default()));
        let mut pgid = None;
        for _ in 0..200 {
            pgid = registered_group(&manager, LINK);
            if pgid.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let pgid = pgid.unwrap();

        assert!(manager.cancel(LINK));

        let states = manager.status(&[LINK.to_string()]);
        assert_eq!(states[LINK], LinkState::idle());
        assert!(registered_group(&manager, LINK).is_none());

        // The worker reaps the kill and must not resurrect the job as Error
        for _ in 0..200 {
            if !cancel_pending(&manager, LINK) && !process::group_alive(pgid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(!process::group_alive(pgid));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let states = manager.status(&[LINK.to_string()]);
        assert_eq!(states[LINK], LinkState::idle());
    }

    #[tokio::test]
    async fn cancel_before_start_spends_one_start() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        assert!(manager.cancel(LINK));
        let states = manager.status(&[LINK.to_string()]);
        assert_eq!(states[LINK], LinkState::idle());

        assert!(!manager.start(LINK, DownloadSettings::default()));
        assert!(manager.start(LINK, DownloadSettings::default()));
        wait_for_status(&manager, LINK, JobStatus::Done).await;
    }

    #[tokio::test]
    async fn refused_start_leaves_a_pending_cancel_armed() {
        let dir = tempdir().unwrap();
        // The tool shrugs off the polite signal and would finish with an
        // artifact, so a cancel lost anywhere in the spawn window shows up
        // as the job resurrecting to done.
        let manager = manager_with_script(
            &dir,
            r#"trap '' TERM
i=0
while [ $i -lt 15 ]; do
  sleep 0.2
  i=$((i+1))
done
printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        assert!(manager.start(LINK, DownloadSettings::default()));
        assert!(manager.cancel(LINK));
        assert!(!manager.start(LINK, DownloadSettings::default()));

        for _ in 0..240 {
            if !worker_active(&manager, LINK) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(!worker_active(&manager, LINK));
        assert!(!cancel_pending(&manager, LINK));

        // The refusal above must not have spent the cancel aimed at the
        // live run: once that run is reaped the link reads idle, not done.
        let states = manager.status(&[LINK.to_string()]);
        assert_eq!(states[LINK], LinkState::idle());

        assert!(manager.start(LINK, DownloadSettings::default()));
        manager.cancel(LINK);
    }

    #[tokio::test]
    async fn done_without_its_file_demotes_to_idle() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        assert!(manager.start(LINK, DownloadSettings::default()));
        wait_for_status(&manager, LINK, JobStatus::Done).await;

        fs::remove_file(dir.path().join("out").join("song.mp3")).unwrap();

        let states = manager.status(&[LINK.to_string()]);
        assert_eq!(states[LINK], LinkState::idle());
    }

    #[tokio::test]
    async fn simulated_progress_advances_without_tool_output() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"sleep 1
printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        assert!(manager.start(LINK, DownloadSettings::default()));

        let mut saw_movement = false;
        for _ in 0..200 {
            let states = manager.status(&[LINK.to_string()]);
            if states[LINK].status == JobStatus::Downloading && states[LINK].progress > 0.0 {
                saw_movement = true;
                break;
            }
            if states[LINK].status == JobStatus::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(saw_movement, "no simulated progress before completion");

        let state = wait_for_status(&manager, LINK, JobStatus::Done).await;
        assert_eq!(state.progress, 100.0);
    }

    #[tokio::test]
    async fn subscriber_sees_nondecreasing_progress_then_terminal() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"echo "Processing query"
sleep 0.1
echo "Progress: 30%"
sleep 0.1
echo "Progress: 60%"
printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        let mut subscription = manager.subscribe(LINK);
        assert!(manager.start(LINK, DownloadSettings::default()));

        let mut events = Vec::new();
        let collect = async {
            while let Some(event) = subscription.recv().await {
                events.push(event);
            }
        };
        tokio::time::timeout(Duration::from_secs(10), collect)
            .await
            .ok()
            .unwrap();

        assert_eq!(events[0].status, JobStatus::Idle);
        assert_eq!(events[0].progress, 0.0);
        assert!(events
            .windows(2)
            .all(|pair| pair[0].progress <= pair[1].progress));

        let last = events.last().unwrap();
        assert!(last.complete);
        assert_eq!(last.status, JobStatus::Done);
        assert_eq!(last.progress, 100.0);
    }

    #[tokio::test]
    async fn cancel_pushes_an_idle_reset_to_subscribers() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(&dir, "exec sleep 30");

        let mut subscription = manager.subscribe(LINK);
        assert!(manager.start(LINK, DownloadSettings::default()));
        assert!(manager.cancel(LINK));

        let snapshot = subscription.recv().await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Idle);

        // Skip past the downloading flip and any simulation ticks that
        // slipped in before the cancel landed.
        let mut event = subscription.recv().await.unwrap();
        assert_eq!(event.status, JobStatus::Downloading);
        while event.status == JobStatus::Downloading {
            event = subscription.recv().await.unwrap();
        }
        assert_eq!(event.status, JobStatus::Idle);
        assert_eq!(event.progress, 0.0);
        assert!(!event.complete);
    }

    #[tokio::test]
    async fn subscribing_to_a_finished_job_closes_after_snapshot() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        assert!(manager.start(LINK, DownloadSettings::default()));
        wait_for_status(&manager, LINK, JobStatus::Done).await;

        let mut subscription = manager.subscribe(LINK);
        let snapshot = subscription.recv().await.unwrap();
        assert!(snapshot.complete);
        assert_eq!(snapshot.progress, 100.0);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribed_listener_hears_nothing_more() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        let mut subscription = manager.subscribe(LINK);
        let snapshot = subscription.recv().await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Idle);

        manager.unsubscribe(LINK, subscription.id);
        assert!(subscription.recv().await.is_none());

        assert!(manager.start(LINK, DownloadSettings::default()));
        wait_for_status(&manager, LINK, JobStatus::Done).await;
    }

    #[tokio::test]
    async fn closed_listener_does_not_disturb_others() {
        let dir = tempdir().unwrap();
        let manager = manager_with_script(
            &dir,
            r#"echo "Progress: 50%"
printf x > "$(dirname "$4")/song.mp3"
exit 0"#,
        );

        let mut broken = manager.subscribe(LINK);
        broken.receiver.close();
        let mut healthy = manager.subscribe(LINK);

        assert!(manager.start(LINK, DownloadSettings::default()));

        let mut events = Vec::new();
        let collect = async {
            while let Some(event) = healthy.recv().await {
                events.push(event);
            }
        };
        tokio::time::timeout(Duration::from_secs(10), collect)
            .await
            .ok()
            .unwrap();

        let last = events.last().unwrap();
        assert!(last.complete);
        assert_eq!(last.status, JobStatus::Done);
    }
}
