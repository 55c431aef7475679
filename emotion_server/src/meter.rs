use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Request counters per detection endpoint.
#[derive(Default)]
pub struct Meter {
    face_requests: AtomicU64,
    batch_requests: AtomicU64,
    speech_requests: AtomicU64,
    multimodal_requests: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            face_requests: AtomicU64::new(0),
            batch_requests: AtomicU64::new(0),
            speech_requests: AtomicU64::new(0),
            multimodal_requests: AtomicU64::new(0),
        }
    }

    pub fn tick_face(&self) {
        self.face_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_batch(&self) {
        self.batch_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_speech(&self) {
        self.speech_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_multimodal(&self) {
        self.multimodal_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts since the last call, labelled by endpoint.
    pub fn get_reset(&self) -> [(&'static str, u64); 4] {
        [
            ("detect-face", self.face_requests.swap(0, Ordering::Relaxed)),
            ("detect-face-batch", self.batch_requests.swap(0, Ordering::Relaxed)),
            ("detect-speech", self.speech_requests.swap(0, Ordering::Relaxed)),
            (
                "detect-multimodal",
                self.multimodal_requests.swap(0, Ordering::Relaxed),
            ),
        ]
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(10));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let elapsed = start.elapsed().as_secs_f32();
            for (endpoint, requests) in METER.get_reset() {
                if requests > 0 {
                    let rate = requests as f32 / elapsed;
                    log::info!("Requests per second to /{endpoint}: {rate:.2}");
                }
            }
        }
    })
}
