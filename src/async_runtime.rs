//! Async runtime integration for Tokio.
//!
//! Recording is synchronous and blocks for as long as the camera streams, so
//! the wrapper here runs it on Tokio's blocking thread pool with
//! `spawn_blocking` and hands the camera, sink and recorder back afterwards.
//!
//! # Features
//!
//! - `tokio` - Enable Tokio runtime support
//!
//! # Example with Tokio
//!
//! ```no_run
//! # #[cfg(feature = "tokio")]
//! # {
//! use pvrec::{camera::Driver, sim::SimDriver, tokio::AsyncRecorder, MemorySink, RecorderOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pvrec::Error> {
//!     let driver = SimDriver::demo();
//!     driver.initialize()?;
//!     let info = driver.camera_list().remove(0);
//!     let camera = driver.open(&info)?;
//!
//!     let mut recorder = AsyncRecorder::new(RecorderOptions::default());
//!     let recording = recorder.record(camera, MemorySink::new(), 100).await;
//!     println!("dropped: {:?}", recording.result?.dropped);
//!     Ok(())
//! }
//! # }
//! ```

#[cfg(feature = "tokio")]
pub mod tokio {
    //! Tokio async runtime integration.
    //!
    //! Provides `AsyncRecorder` that uses `tokio::task::spawn_blocking`
    //! to record without blocking the Tokio runtime.

    use crate::{
        camera::Camera,
        config::RecorderOptions,
        recorder::{OutcomeReport, Recorder},
        sink::FrameSink,
        Result,
    };

    /// Camera, sink and outcome of a finished recording.
    ///
    /// The camera and sink are returned even when the recording failed, so
    /// the caller can close or reuse them.
    #[derive(Debug)]
    pub struct Recording<C, S> {
        pub camera: C,
        pub sink: S,
        pub result: Result<OutcomeReport>,
    }

    /// Async recorder wrapper for Tokio runtime.
    ///
    /// Each call to [`record`](Self::record) moves the underlying [`Recorder`]
    /// onto the blocking pool together with the camera and sink; all three come
    /// back when the recording ends.
    #[derive(Debug)]
    pub struct AsyncRecorder {
        options: RecorderOptions,
        inner: Option<Recorder>,
    }

    impl AsyncRecorder {
        pub fn new(options: RecorderOptions) -> Self {
            Self {
                inner: Some(Recorder::new(options.clone())),
                options,
            }
        }

        /// Wraps an existing recorder, keeping its event observer.
        pub fn from_recorder(recorder: Recorder) -> Self {
            Self {
                options: recorder.options().clone(),
                inner: Some(recorder),
            }
        }

        /// The wrapped recorder, e.g. to inspect the last report.
        pub fn recorder(&self) -> Option<&Recorder> {
            self.inner.as_ref()
        }

        /// Async version of [`Recorder::record`].
        ///
        /// Runs the whole session on Tokio's blocking thread pool.
        pub async fn record<C, S>(&mut self, camera: C, sink: S, num_frames: u64) -> Recording<C, S>
        where
            C: Camera + Send + 'static,
            S: FrameSink + Send + 'static,
        {
            let mut recorder = self
                .inner
                .take()
                .unwrap_or_else(|| Recorder::new(self.options.clone()));

            let task = ::tokio::task::spawn_blocking(move || {
                let (mut camera, mut sink) = (camera, sink);
                let result = recorder.record(&mut camera, &mut sink, num_frames);
                (recorder, Recording {
                    camera,
                    sink,
                    result,
                })
            });

            match task.await {
                Ok((recorder, recording)) => {
                    self.inner = Some(recorder);
                    recording
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => panic!("recording task was cancelled: {e}"),
            }
        }
    }

}
