//! Control interface to SDR pipelines.
//!
//! Pipelines (source → demodulator, modulator → sink) are built by a
//! back-end outside this crate. Only their tuning knobs are driven from here,
//! one setter per parameter.

use std::fmt;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SdrError {
    #[error("{component} does not support {parameter}")]
    UnsupportedParameter {
        component: &'static str,
        parameter: &'static str,
    },

    #[error("SDR back-end error: {0}")]
    Backend(String),
}

/// Tunable pipeline parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SdrParameter {
    /// Receive gain in dB.
    Gain(f64),
    LnaGain(f64),
    /// Centre frequency in Hz.
    Frequency(u64),
    TxGain(f64),
    /// Hz.
    Bandwidth(u64),
    /// Samples per second.
    SampleRate(u64),
    ExperimentalDemodulator(bool),
}

impl SdrParameter {
    pub fn name(&self) -> &'static str {
        match self {
            SdrParameter::Gain(_) => "GAIN",
            SdrParameter::LnaGain(_) => "LNA_GAIN",
            SdrParameter::Frequency(_) => "FREQUENCY",
            SdrParameter::TxGain(_) => "TX_GAIN",
            SdrParameter::Bandwidth(_) => "BANDWIDTH",
            SdrParameter::SampleRate(_) => "SAMPLE_RATE",
            SdrParameter::ExperimentalDemodulator(_) => "EXPERIMENTAL_DEMODULATOR",
        }
    }
}

impl fmt::Display for SdrParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn unsupported(component: &'static str, parameter: &'static str) -> SdrError {
    SdrError::UnsupportedParameter {
        component,
        parameter,
    }
}

/// Receive front-end.
pub trait SdrSource: Send {
    fn set_gain(&mut self, _gain: f64) -> Result<(), SdrError> {
        Err(unsupported("source", "GAIN"))
    }

    fn set_lna_gain(&mut self, _gain: f64) -> Result<(), SdrError> {
        Err(unsupported("source", "LNA_GAIN"))
    }

    fn set_frequency(&mut self, frequency: u64) -> Result<(), SdrError>;

    fn set_bandwidth(&mut self, _bandwidth: u64) -> Result<(), SdrError> {
        Err(unsupported("source", "BANDWIDTH"))
    }

    fn set_sample_rate(&mut self, sample_rate: u64) -> Result<(), SdrError>;
}

/// Transmit front-end.
pub trait SdrSink: Send {
    fn set_tx_gain(&mut self, _gain: f64) -> Result<(), SdrError> {
        Err(unsupported("sink", "TX_GAIN"))
    }

    fn set_frequency(&mut self, frequency: u64) -> Result<(), SdrError>;

    fn set_bandwidth(&mut self, _bandwidth: u64) -> Result<(), SdrError> {
        Err(unsupported("sink", "BANDWIDTH"))
    }

    fn set_sample_rate(&mut self, sample_rate: u64) -> Result<(), SdrError>;
}

pub trait Demodulator: Send {
    /// Next demodulated frame, if one is ready.
    fn next_frame(&mut self) -> Option<Vec<u8>>;

    fn set_experimental(&mut self, _enabled: bool) -> Result<(), SdrError> {
        Err(unsupported("demodulator", "EXPERIMENTAL_DEMODULATOR"))
    }
}

pub trait Modulator: Send {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), SdrError>;
}

/// A built pipeline. Receive pipelines expose a source and a demodulator,
/// transmit pipelines a modulator and a sink.
pub trait SdrPipeline: Send {
    fn source(&mut self) -> Option<&mut dyn SdrSource> {
        None
    }

    fn sink(&mut self) -> Option<&mut dyn SdrSink> {
        None
    }

    fn demodulator(&mut self) -> Option<&mut dyn Demodulator> {
        None
    }

    fn modulator(&mut self) -> Option<&mut dyn Modulator> {
        None
    }

    fn start(&mut self) -> Result<(), SdrError>;

    fn stop(&mut self) -> Result<(), SdrError>;
}

pub trait SdrPipelineBuilder {
    fn build_receive_pipeline(&self, interface: &str) -> Result<Box<dyn SdrPipeline>, SdrError>;

    fn build_transmit_pipeline(&self, interface: &str) -> Result<Box<dyn SdrPipeline>, SdrError>;
}

/// Route `parameter` to the pipeline component that owns it.
///
/// Frequency, bandwidth and sample rate go to whichever front-end the
/// pipeline has (both, for a full-duplex pipeline).
pub fn apply_parameter(
    pipeline: &mut dyn SdrPipeline,
    parameter: SdrParameter,
) -> Result<(), SdrError> {
    debug!(parameter = %parameter, value = ?parameter, "Applying SDR parameter");
    match parameter {
        SdrParameter::Gain(gain) => source(pipeline, parameter)?.set_gain(gain),
        SdrParameter::LnaGain(gain) => source(pipeline, parameter)?.set_lna_gain(gain),
        SdrParameter::TxGain(gain) => sink(pipeline, parameter)?.set_tx_gain(gain),
        SdrParameter::ExperimentalDemodulator(enabled) => pipeline
            .demodulator()
            .ok_or_else(|| unsupported("pipeline", parameter.name()))?
            .set_experimental(enabled),
        SdrParameter::Frequency(_) | SdrParameter::Bandwidth(_) | SdrParameter::SampleRate(_) => {
            let mut applied = false;
            if let Some(source) = pipeline.source() {
                match parameter {
                    SdrParameter::Frequency(hz) => source.set_frequency(hz)?,
                    SdrParameter::Bandwidth(hz) => source.set_bandwidth(hz)?,
                    SdrParameter::SampleRate(rate) => source.set_sample_rate(rate)?,
                    _ => {}
                }
                applied = true;
            }
            if let Some(sink) = pipeline.sink() {
                match parameter {
                    SdrParameter::Frequency(hz) => sink.set_frequency(hz)?,
                    SdrParameter::Bandwidth(hz) => sink.set_bandwidth(hz)?,
                    SdrParameter::SampleRate(rate) => sink.set_sample_rate(rate)?,
                    _ => {}
                }
                applied = true;
            }
            if applied {
                Ok(())
            } else {
                Err(unsupported("pipeline", parameter.name()))
            }
        }
    }
}

fn source(
    pipeline: &mut dyn SdrPipeline,
    parameter: SdrParameter,
) -> Result<&mut dyn SdrSource, SdrError> {
    pipeline
        .source()
        .ok_or_else(|| unsupported("pipeline", parameter.name()))
}

fn sink(
    pipeline: &mut dyn SdrPipeline,
    parameter: SdrParameter,
) -> Result<&mut dyn SdrSink, SdrError> {
    pipeline
        .sink()
        .ok_or_else(|| unsupported("pipeline", parameter.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeSource {
        gain: Option<f64>,
        frequency: Option<u64>,
        sample_rate: Option<u64>,
    }

    impl SdrSource for FakeSource {
        fn set_gain(&mut self, gain: f64) -> Result<(), SdrError> {
            self.gain = Some(gain);
            Ok(())
        }

        fn set_frequency(&mut self, frequency: u64) -> Result<(), SdrError> {
            self.frequency = Some(frequency);
            Ok(())
        }

        fn set_sample_rate(&mut self, sample_rate: u64) -> Result<(), SdrError> {
            self.sample_rate = Some(sample_rate);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDemodulator {
        experimental: bool,
        frames: VecDeque<Vec<u8>>,
    }

    impl Demodulator for FakeDemodulator {
        fn next_frame(&mut self) -> Option<Vec<u8>> {
            self.frames.pop_front()
        }

        fn set_experimental(&mut self, enabled: bool) -> Result<(), SdrError> {
            self.experimental = enabled;
            Ok(())
        }
    }

    #[derive(Default)]
    struct ReceivePipeline {
        source: FakeSource,
        demodulator: FakeDemodulator,
        running: bool,
    }

    impl SdrPipeline for ReceivePipeline {
        fn source(&mut self) -> Option<&mut dyn SdrSource> {
            Some(&mut self.source)
        }

        fn demodulator(&mut self) -> Option<&mut dyn Demodulator> {
            Some(&mut self.demodulator)
        }

        fn start(&mut self) -> Result<(), SdrError> {
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), SdrError> {
            self.running = false;
            Ok(())
        }
    }

    struct FakeBuilder;

    impl SdrPipelineBuilder for FakeBuilder {
        fn build_receive_pipeline(
            &self,
            interface: &str,
        ) -> Result<Box<dyn SdrPipeline>, SdrError> {
            if interface.starts_with("hackrf") {
                Ok(Box::new(ReceivePipeline::default()))
            } else {
                Err(SdrError::Backend(format!("no SDR at {}", interface)))
            }
        }

        fn build_transmit_pipeline(
            &self,
            interface: &str,
        ) -> Result<Box<dyn SdrPipeline>, SdrError> {
            Err(SdrError::Backend(format!("{} cannot transmit", interface)))
        }
    }

    #[test]
    fn test_parameters_reach_their_component() {
        let mut pipeline = ReceivePipeline::default();
        apply_parameter(&mut pipeline, SdrParameter::Gain(32.0)).unwrap();
        apply_parameter(&mut pipeline, SdrParameter::Frequency(2_402_000_000)).unwrap();
        apply_parameter(&mut pipeline, SdrParameter::SampleRate(4_000_000)).unwrap();
        apply_parameter(&mut pipeline, SdrParameter::ExperimentalDemodulator(true)).unwrap();

        assert_eq!(pipeline.source.gain, Some(32.0));
        assert_eq!(pipeline.source.frequency, Some(2_402_000_000));
        assert_eq!(pipeline.source.sample_rate, Some(4_000_000));
        assert!(pipeline.demodulator.experimental);
    }

    #[test]
    fn test_unsupported_parameters_are_reported() {
        let mut pipeline = ReceivePipeline::default();
        assert!(matches!(
            apply_parameter(&mut pipeline, SdrParameter::TxGain(10.0)),
            Err(SdrError::UnsupportedParameter { parameter: "TX_GAIN", .. })
        ));
        assert!(matches!(
            apply_parameter(&mut pipeline, SdrParameter::LnaGain(8.0)),
            Err(SdrError::UnsupportedParameter { component: "source", .. })
        ));
    }

    #[test]
    fn test_builder_yields_running_pipeline() {
        let builder = FakeBuilder;
        let mut pipeline = builder.build_receive_pipeline("hackrf0").unwrap();
        pipeline.start().unwrap();
        apply_parameter(pipeline.as_mut(), SdrParameter::Bandwidth(2_000_000)).unwrap_err();
        assert!(pipeline.demodulator().unwrap().next_frame().is_none());
        assert!(builder.build_receive_pipeline("rtlsdr0").is_err());
        assert!(builder.build_transmit_pipeline("hackrf0").is_err());
    }
}
