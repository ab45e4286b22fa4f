//! Runtime thread for polyphase.
//!
//! The runtime thread:
//! - Owns the playback engine
//! - Processes engine messages
//! - Polls the scheduler at a fixed interval
//! - Publishes a status snapshot after every change

use crate::audio::AudioSink;
use crate::engine::PlaybackEngine;
use crate::error::{Error, Result};
use crate::events::PlaybackEvent;
use crate::rhythm::RhythmData;
use crate::state::{EngineMessage, PlaybackStatus, Reply, StatusManager};
use crate::voice::Adsr;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long a caller waits for the runtime thread to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running engine.
///
/// Cheap to clone; every clone talks to the same thread.
#[derive(Clone)]
pub struct RuntimeHandle {
    /// Sender for engine messages.
    message_tx: Sender<EngineMessage>,
    /// Latest published status.
    status: StatusManager,
    /// Flag to signal shutdown.
    shutdown: Arc<AtomicBool>,
}

impl RuntimeHandle {
    /// Send a message without waiting for a reply.
    pub fn send(&self, msg: EngineMessage) -> Result<()> {
        self.message_tx
            .send(msg)
            .map_err(|_| Error::Runtime("runtime thread is not running".to_string()))
    }

    /// Send a command and wait for its result.
    fn request(&self, build: impl FnOnce(Reply) -> EngineMessage) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(build(reply_tx))?;
        reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|e| Error::Runtime(format!("no reply from runtime thread: {}", e)))?
    }

    pub fn start(&self, phase_ms: Option<f64>) -> Result<()> {
        self.request(|reply| EngineMessage::Start { phase_ms, reply })
    }

    pub fn stop(&self) -> Result<()> {
        self.send(EngineMessage::Stop)
    }

    pub fn toggle(&self) -> Result<()> {
        self.request(|reply| EngineMessage::Toggle { reply })
    }

    pub fn set_tempo(&self, seconds: f64) -> Result<()> {
        self.request(|reply| EngineMessage::SetTempo { seconds, reply })
    }

    pub fn set_tempo_multiplier(&self, multiplier: f64) -> Result<()> {
        self.request(|reply| EngineMessage::SetTempoMultiplier { multiplier, reply })
    }

    pub fn set_fundamental_frequency(&self, hz: f64) -> Result<()> {
        self.request(|reply| EngineMessage::SetFundamental { hz, reply })
    }

    pub fn set_legato(&self, legato: bool) -> Result<()> {
        self.request(|reply| EngineMessage::SetLegato { legato, reply })
    }

    pub fn set_envelope(&self, envelope: Adsr) -> Result<()> {
        self.request(|reply| EngineMessage::SetEnvelope { envelope, reply })
    }

    pub fn set_master_gain(&self, gain: f32) -> Result<()> {
        self.request(|reply| EngineMessage::SetMasterGain { gain, reply })
    }

    pub fn set_layer_solo(&self, layer: Option<usize>) -> Result<()> {
        self.request(|reply| EngineMessage::SetLayerSolo { layer, reply })
    }

    pub fn set_layer_mute(&self, layer: usize, muted: bool) -> Result<()> {
        self.request(|reply| EngineMessage::SetLayerMute { layer, muted, reply })
    }

    pub fn set_selected_ratios(&self, fractions: HashSet<String>) -> Result<()> {
        self.send(EngineMessage::SetSelectedRatios { fractions })
    }

    pub fn set_rhythm_data(&self, rhythm: RhythmData) -> Result<()> {
        self.request(|reply| EngineMessage::SetRhythm {
            rhythm: Box::new(rhythm),
            reply,
        })
    }

    pub fn reload_rhythm(&self) -> Result<()> {
        self.request(|reply| EngineMessage::ReloadRhythm { reply })
    }

    /// Receive playback notifications.
    pub fn subscribe(&self) -> Result<Receiver<PlaybackEvent>> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(EngineMessage::Subscribe { reply: reply_tx })?;
        reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|e| Error::Runtime(format!("no reply from runtime thread: {}", e)))
    }

    /// Latest status published by the runtime thread.
    pub fn status(&self) -> PlaybackStatus {
        self.status.snapshot()
    }

    /// Read the status with a closure.
    pub fn with_status<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&PlaybackStatus) -> R,
    {
        self.status.with_status_read(f)
    }

    /// Signal the runtime to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// A playback engine running on its own thread.
pub struct Runtime {
    handle: RuntimeHandle,
    thread_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Move the engine onto a new thread and start polling it.
    pub fn start<S>(engine: PlaybackEngine<S>) -> Result<Self>
    where
        S: AudioSink + Send + 'static,
    {
        let interval = Duration::from_millis(engine.config().transport.schedule_interval_ms);
        let (message_tx, message_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let status = StatusManager::new();
        status.publish(PlaybackStatus::capture(&engine, 0));

        let handle = RuntimeHandle {
            message_tx,
            status: status.clone(),
            shutdown: shutdown.clone(),
        };

        let thread_handle = thread::Builder::new()
            .name("polyphase-runtime".to_string())
            .spawn(move || {
                let mut rt = RuntimeThread {
                    engine,
                    message_rx,
                    status,
                    interval,
                    version: 0,
                };
                rt.run(shutdown);
            })?;

        log::info!("Runtime started (poll interval {:?})", interval);

        Ok(Self {
            handle,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get a handle to interact with the runtime.
    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// Shut down the runtime gracefully.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.handle.shutdown();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Runtime thread panicked");
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.join();
    }
}

struct RuntimeThread<S: AudioSink> {
    engine: PlaybackEngine<S>,
    message_rx: Receiver<EngineMessage>,
    status: StatusManager,
    interval: Duration,
    version: u64,
}

impl<S: AudioSink> RuntimeThread<S> {
    fn run(&mut self, shutdown: Arc<AtomicBool>) {
        let mut next_poll = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            if !self.step(&mut next_poll) {
                break;
            }
        }

        self.engine.stop();
        self.publish();
        log::info!("Runtime thread finished");
    }

    /// Handle at most one message, then poll if the deadline has passed.
    ///
    /// Returns false once every handle is gone.
    fn step(&mut self, next_poll: &mut Instant) -> bool {
        let timeout = next_poll.saturating_duration_since(Instant::now());
        match self.message_rx.recv_timeout(timeout) {
            Ok(msg) => {
                let pending = self.handle_message(msg);
                // Callers read the status right after the reply.
                self.publish();
                if let Some((reply, result)) = pending {
                    respond(reply, result);
                }
                if Instant::now() < *next_poll {
                    return true;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("All runtime handles dropped");
                return false;
            }
        }

        self.engine.poll();
        self.publish();

        *next_poll += self.interval;
        let now = Instant::now();
        if *next_poll < now {
            // Fell behind; the next window derives from the live clock anyway.
            log::debug!("Scheduler poll late by {:?}", now - *next_poll);
            *next_poll = now + self.interval;
        }
        true
    }

    fn publish(&mut self) {
        self.version += 1;
        self.status
            .publish(PlaybackStatus::capture(&self.engine, self.version));
    }

    fn handle_message(&mut self, msg: EngineMessage) -> Option<(Reply, Result<()>)> {
        let engine = &mut self.engine;
        match msg {
            EngineMessage::Start { phase_ms, reply } => Some((reply, engine.start(phase_ms))),
            EngineMessage::Stop => {
                engine.stop();
                None
            }
            EngineMessage::Toggle { reply } => Some((reply, engine.toggle())),
            EngineMessage::SetTempo { seconds, reply } => Some((reply, engine.set_tempo(seconds))),
            EngineMessage::SetTempoMultiplier { multiplier, reply } => {
                Some((reply, engine.set_tempo_multiplier(multiplier)))
            }
            EngineMessage::SetFundamental { hz, reply } => {
                Some((reply, engine.set_fundamental_frequency(hz)))
            }
            EngineMessage::SetLegato { legato, reply } => Some((reply, engine.set_legato(legato))),
            EngineMessage::SetEnvelope { envelope, reply } => {
                Some((reply, engine.set_envelope(envelope)))
            }
            EngineMessage::SetMasterGain { gain, reply } => {
                Some((reply, engine.set_master_gain(gain)))
            }
            EngineMessage::SetLayerSolo { layer, reply } => {
                Some((reply, engine.set_layer_solo(layer)))
            }
            EngineMessage::SetLayerMute {
                layer,
                muted,
                reply,
            } => Some((reply, engine.set_layer_mute(layer, muted))),
            EngineMessage::SetSelectedRatios { fractions } => {
                engine.set_selected_ratios(fractions);
                None
            }
            EngineMessage::SetRhythm { rhythm, reply } => {
                Some((reply, engine.set_rhythm_data(*rhythm)))
            }
            EngineMessage::ReloadRhythm { reply } => Some((reply, engine.reload_rhythm())),
            EngineMessage::Subscribe { reply } => {
                // The caller may have given up waiting.
                let _ = reply.send(engine.subscribe());
                None
            }
        }
    }
}

fn respond(reply: Reply, result: Result<()>) {
    if let Err(e) = &result {
        log::warn!("Command failed: {}", e);
    }
    let _ = reply.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingSink;
    use crate::config::EngineConfig;

    fn runtime() -> Runtime {
        let rhythm = RhythmData::from_layers(
            [3, 4, 0, 0],
            [vec![3, 2, 1], vec![3, 1, 2, 3], vec![], vec![]],
            110.0,
        )
        .unwrap();
        let engine =
            PlaybackEngine::new(EngineConfig::default(), Box::new(rhythm), RecordingSink::new())
                .unwrap();
        Runtime::start(engine).unwrap()
    }

    #[test]
    fn test_commands_round_trip_through_thread() {
        let rt = runtime();
        let handle = rt.handle().clone();
        let events = handle.subscribe().unwrap();

        handle.start(None).unwrap();
        assert!(handle.status().playing);
        assert_eq!(events.recv_timeout(REPLY_TIMEOUT).unwrap(), PlaybackEvent::Started);

        handle.set_tempo(3.0).unwrap();
        assert_eq!(handle.with_status(|s| s.cycle_ticks), 2880);

        assert!(matches!(handle.set_layer_mute(7, true), Err(Error::InvalidLayer(7))));

        handle.stop().unwrap();
        handle.set_legato(true).unwrap();
        let status = handle.status();
        assert!(!status.playing);
        assert!(status.legato);

        rt.shutdown();
    }

    #[test]
    fn test_due_poll_runs_between_messages() {
        let rhythm = RhythmData::from_layers(
            [3, 4, 0, 0],
            [vec![3, 2, 1], vec![3, 1, 2, 3], vec![], vec![]],
            110.0,
        )
        .unwrap();
        let mut engine =
            PlaybackEngine::new(EngineConfig::default(), Box::new(rhythm), RecordingSink::new())
                .unwrap();
        engine.start(None).unwrap();
        engine.sink_mut().advance_to(1.0);
        let events = engine.subscribe();

        let (message_tx, message_rx) = unbounded();
        let mut rt = RuntimeThread {
            engine,
            message_rx,
            status: StatusManager::new(),
            interval: Duration::from_millis(30),
            version: 0,
        };
        let notes = |events: &Receiver<PlaybackEvent>| {
            events
                .try_iter()
                .filter(|e| matches!(e, PlaybackEvent::NoteTriggered { .. }))
                .count()
        };

        // Not due yet: the message is handled and nothing is scheduled.
        let mut next_poll = Instant::now() + Duration::from_secs(3600);
        message_tx
            .send(EngineMessage::SetSelectedRatios { fractions: HashSet::new() })
            .unwrap();
        assert!(rt.step(&mut next_poll));
        assert_eq!(notes(&events), 0);

        // Due: a queued message does not hold back the poll.
        let mut next_poll = Instant::now();
        message_tx
            .send(EngineMessage::SetSelectedRatios { fractions: HashSet::new() })
            .unwrap();
        assert!(rt.step(&mut next_poll));
        assert!(notes(&events) > 0);

        drop(message_tx);
        let mut next_poll = Instant::now() + Duration::from_secs(3600);
        assert!(!rt.step(&mut next_poll));
    }

    #[test]
    fn test_errors_surface_synchronously() {
        let rt = runtime();
        let handle = rt.handle().clone();
        handle.set_rhythm_data(RhythmData::default()).unwrap();
        assert!(matches!(handle.start(None), Err(Error::NothingToPlay)));
        assert!(matches!(handle.set_tempo(-2.0), Err(Error::InvalidTempo(_))));
        drop(rt);

        // The thread is gone; commands fail instead of hanging.
        assert!(matches!(handle.toggle(), Err(Error::Runtime(_))));
    }
}
