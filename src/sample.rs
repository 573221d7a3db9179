//! Sample payload, delivery metadata and batch classification.

use std::fmt;

use crate::domain::EndpointId;

/// One unit of topic data. `id` is the instance key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Sample {
    pub id: i32,
    pub value: i32,
}

impl Sample {
    /// Registered type name of topics carrying `Sample`.
    pub const TYPE_NAME: &'static str = "Sample";

    pub fn new(id: i32, value: i32) -> Self {
        Self { id, value }
    }

    /// Key-only sample used for lifecycle deliveries (dispose, unregister).
    pub(crate) fn key_only(id: i32) -> Self {
        Self { id, value: 0 }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[id: {}, value: {}]", self.id, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

impl InstanceState {
    pub fn is_alive(self) -> bool {
        matches!(self, InstanceState::Alive)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Alive => "ALIVE",
            InstanceState::NotAliveDisposed => "NOT_ALIVE_DISPOSED",
            InstanceState::NotAliveNoWriters => "NOT_ALIVE_NO_WRITERS",
        };
        f.write_str(name)
    }
}

/// Metadata attached to every received unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// `false` when the unit only reports an instance lifecycle transition.
    pub valid: bool,
    pub instance_state: InstanceState,
    /// Present when the unit was written inside a coherent set.
    pub coherent_set_sequence_number: Option<u64>,
    pub source_timestamp_ns: u64,
    pub publication: EndpointId,
}

/// A received unit as handed out inside a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanedSample {
    data: Sample,
    info: SampleInfo,
}

impl LoanedSample {
    pub(crate) fn new(data: Sample, info: SampleInfo) -> Self {
        Self { data, info }
    }

    /// The payload. Only meaningful when `info().valid` is set.
    pub fn data(&self) -> &Sample {
        &self.data
    }

    pub fn info(&self) -> &SampleInfo {
        &self.info
    }
}

/// Outcome of classifying one received unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleReport {
    Data {
        sample: Sample,
        coherent_set: Option<u64>,
    },
    InstanceStateChanged {
        id: i32,
        state: InstanceState,
    },
}

impl SampleReport {
    pub fn is_data(&self) -> bool {
        matches!(self, SampleReport::Data { .. })
    }
}

impl fmt::Display for SampleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleReport::Data { sample, .. } => write!(f, "{sample}"),
            SampleReport::InstanceStateChanged { id, state } => {
                write!(f, "Instance {id} state changed to {state}")
            }
        }
    }
}

/// Classifies a whole batch up front so no side effect runs on a partial view.
pub fn classify<'a, I>(batch: I) -> Vec<SampleReport>
where
    I: IntoIterator<Item = &'a LoanedSample>,
{
    batch
        .into_iter()
        .map(|unit| {
            if unit.info.valid {
                SampleReport::Data {
                    sample: unit.data,
                    coherent_set: unit.info.coherent_set_sequence_number,
                }
            } else {
                SampleReport::InstanceStateChanged {
                    id: unit.data.id,
                    state: unit.info.instance_state,
                }
            }
        })
        .collect()
}
