//! Status kinds, masks and the per-kind status payloads raised by endpoints.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::domain::EndpointId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    OfferedDeadlineMissed,
    OfferedIncompatibleQos,
    PublicationMatched,
    LivelinessLost,
    RequestedDeadlineMissed,
    SampleRejected,
    SampleLost,
    RequestedIncompatibleQos,
    SubscriptionMatched,
    LivelinessChanged,
    DataAvailable,
}

impl StatusKind {
    pub const ALL: [StatusKind; 11] = [
        StatusKind::OfferedDeadlineMissed,
        StatusKind::OfferedIncompatibleQos,
        StatusKind::PublicationMatched,
        StatusKind::LivelinessLost,
        StatusKind::RequestedDeadlineMissed,
        StatusKind::SampleRejected,
        StatusKind::SampleLost,
        StatusKind::RequestedIncompatibleQos,
        StatusKind::SubscriptionMatched,
        StatusKind::LivelinessChanged,
        StatusKind::DataAvailable,
    ];

    pub fn mask(self) -> StatusMask {
        match self {
            StatusKind::OfferedDeadlineMissed => StatusMask::OFFERED_DEADLINE_MISSED,
            StatusKind::OfferedIncompatibleQos => StatusMask::OFFERED_INCOMPATIBLE_QOS,
            StatusKind::PublicationMatched => StatusMask::PUBLICATION_MATCHED,
            StatusKind::LivelinessLost => StatusMask::LIVELINESS_LOST,
            StatusKind::RequestedDeadlineMissed => StatusMask::REQUESTED_DEADLINE_MISSED,
            StatusKind::SampleRejected => StatusMask::SAMPLE_REJECTED,
            StatusKind::SampleLost => StatusMask::SAMPLE_LOST,
            StatusKind::RequestedIncompatibleQos => StatusMask::REQUESTED_INCOMPATIBLE_QOS,
            StatusKind::SubscriptionMatched => StatusMask::SUBSCRIPTION_MATCHED,
            StatusKind::LivelinessChanged => StatusMask::LIVELINESS_CHANGED,
            StatusKind::DataAvailable => StatusMask::DATA_AVAILABLE,
        }
    }

    pub fn is_writer_kind(self) -> bool {
        StatusMask::writer().contains(self.mask())
    }
}

bitflags! {
    /// A set of status kinds.
    ///
    /// On an endpoint the mask names the kinds withheld from its listener.
    /// Withheld kinds are still recorded and can be observed by polling or
    /// through a `StatusCondition`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct StatusMask: u32 {
        const OFFERED_DEADLINE_MISSED = 1 << 0;
        const OFFERED_INCOMPATIBLE_QOS = 1 << 1;
        const PUBLICATION_MATCHED = 1 << 2;
        const LIVELINESS_LOST = 1 << 3;
        const REQUESTED_DEADLINE_MISSED = 1 << 4;
        const SAMPLE_REJECTED = 1 << 5;
        const SAMPLE_LOST = 1 << 6;
        const REQUESTED_INCOMPATIBLE_QOS = 1 << 7;
        const SUBSCRIPTION_MATCHED = 1 << 8;
        const LIVELINESS_CHANGED = 1 << 9;
        const DATA_AVAILABLE = 1 << 10;
    }
}

impl StatusMask {
    /// Kinds a `DataWriter` can raise.
    pub fn writer() -> Self {
        Self::OFFERED_DEADLINE_MISSED
            | Self::OFFERED_INCOMPATIBLE_QOS
            | Self::PUBLICATION_MATCHED
            | Self::LIVELINESS_LOST
    }

    /// Kinds a `DataReader` can raise.
    pub fn reader() -> Self {
        Self::all().difference(Self::writer())
    }

    pub fn contains_kind(self, kind: StatusKind) -> bool {
        self.contains(kind.mask())
    }

    pub fn kinds(self) -> impl Iterator<Item = StatusKind> {
        StatusKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.mask()))
    }
}

impl From<StatusKind> for StatusMask {
    fn from(kind: StatusKind) -> Self {
        kind.mask()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadlineMissedStatus {
    pub total_count: u64,
    pub total_count_change: u64,
    pub last_instance: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncompatibleQosStatus {
    pub total_count: u64,
    pub total_count_change: u64,
    pub last_policy: Option<&'static str>,
}

/// Shared by `PublicationMatched` (peer = subscription) and
/// `SubscriptionMatched` (peer = publication).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchedStatus {
    pub total_count: u64,
    pub total_count_change: u64,
    pub current_count: u64,
    pub current_count_change: i64,
    pub last_peer: Option<EndpointId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivelinessLostStatus {
    pub total_count: u64,
    pub total_count_change: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RejectedReason {
    #[default]
    NotRejected,
    SamplesLimit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleRejectedStatus {
    pub total_count: u64,
    pub total_count_change: u64,
    pub last_reason: RejectedReason,
    pub last_instance: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleLostStatus {
    pub total_count: u64,
    pub total_count_change: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivelinessChangedStatus {
    pub alive_count: u64,
    pub not_alive_count: u64,
    pub alive_count_change: i64,
    pub not_alive_count_change: i64,
    pub last_publication: Option<EndpointId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    OfferedDeadlineMissed(DeadlineMissedStatus),
    OfferedIncompatibleQos(IncompatibleQosStatus),
    PublicationMatched(MatchedStatus),
    LivelinessLost(LivelinessLostStatus),
    RequestedDeadlineMissed(DeadlineMissedStatus),
    SampleRejected(SampleRejectedStatus),
    SampleLost(SampleLostStatus),
    RequestedIncompatibleQos(IncompatibleQosStatus),
    SubscriptionMatched(MatchedStatus),
    LivelinessChanged(LivelinessChangedStatus),
    DataAvailable,
}

impl StatusEvent {
    pub fn kind(&self) -> StatusKind {
        match self {
            StatusEvent::OfferedDeadlineMissed(_) => StatusKind::OfferedDeadlineMissed,
            StatusEvent::OfferedIncompatibleQos(_) => StatusKind::OfferedIncompatibleQos,
            StatusEvent::PublicationMatched(_) => StatusKind::PublicationMatched,
            StatusEvent::LivelinessLost(_) => StatusKind::LivelinessLost,
            StatusEvent::RequestedDeadlineMissed(_) => StatusKind::RequestedDeadlineMissed,
            StatusEvent::SampleRejected(_) => StatusKind::SampleRejected,
            StatusEvent::SampleLost(_) => StatusKind::SampleLost,
            StatusEvent::RequestedIncompatibleQos(_) => StatusKind::RequestedIncompatibleQos,
            StatusEvent::SubscriptionMatched(_) => StatusKind::SubscriptionMatched,
            StatusEvent::LivelinessChanged(_) => StatusKind::LivelinessChanged,
            StatusEvent::DataAvailable => StatusKind::DataAvailable,
        }
    }
}

/// Last value of every status raised on one endpoint plus the set of kinds
/// changed since they were last consumed.
#[derive(Debug, Default)]
pub(crate) struct StatusTable {
    latest: HashMap<StatusKind, StatusEvent>,
    changes: StatusMask,
}

impl StatusTable {
    pub(crate) fn record(&mut self, event: StatusEvent) {
        let kind = event.kind();
        self.latest.insert(kind, event);
        self.changes.insert(kind.mask());
    }

    pub(crate) fn changes(&self) -> StatusMask {
        self.changes
    }

    pub(crate) fn consume(&mut self, kind: StatusKind) {
        self.changes.remove(kind.mask());
    }

    pub(crate) fn take(&mut self, kind: StatusKind) -> Option<StatusEvent> {
        self.consume(kind);
        self.latest.get(&kind).copied()
    }

    fn matched(&self, kind: StatusKind) -> MatchedStatus {
        match self.latest.get(&kind) {
            Some(StatusEvent::PublicationMatched(status))
            | Some(StatusEvent::SubscriptionMatched(status)) => *status,
            _ => MatchedStatus::default(),
        }
    }

    /// Next matched status after a peer joined (`joined`) or left.
    pub(crate) fn next_matched(
        &self,
        kind: StatusKind,
        peer: EndpointId,
        joined: bool,
    ) -> MatchedStatus {
        let prev = self.matched(kind);
        if joined {
            MatchedStatus {
                total_count: prev.total_count + 1,
                total_count_change: 1,
                current_count: prev.current_count + 1,
                current_count_change: 1,
                last_peer: Some(peer),
            }
        } else {
            MatchedStatus {
                total_count: prev.total_count,
                total_count_change: 0,
                current_count: prev.current_count.saturating_sub(1),
                current_count_change: -1,
                last_peer: Some(peer),
            }
        }
    }

    pub(crate) fn next_liveliness(&self, writer: EndpointId, alive: bool) -> LivelinessChangedStatus {
        let prev = match self.latest.get(&StatusKind::LivelinessChanged) {
            Some(StatusEvent::LivelinessChanged(status)) => *status,
            _ => LivelinessChangedStatus::default(),
        };
        let alive_count = if alive {
            prev.alive_count + 1
        } else {
            prev.alive_count.saturating_sub(1)
        };
        LivelinessChangedStatus {
            alive_count,
            not_alive_count: prev.not_alive_count,
            alive_count_change: alive_count as i64 - prev.alive_count as i64,
            not_alive_count_change: 0,
            last_publication: Some(writer),
        }
    }

    pub(crate) fn next_rejected(&self, instance: i32) -> SampleRejectedStatus {
        let total = match self.latest.get(&StatusKind::SampleRejected) {
            Some(StatusEvent::SampleRejected(status)) => status.total_count,
            _ => 0,
        };
        SampleRejectedStatus {
            total_count: total + 1,
            total_count_change: 1,
            last_reason: RejectedReason::SamplesLimit,
            last_instance: Some(instance),
        }
    }

    pub(crate) fn next_lost(&self, lost: u64) -> SampleLostStatus {
        let total = match self.latest.get(&StatusKind::SampleLost) {
            Some(StatusEvent::SampleLost(status)) => status.total_count,
            _ => 0,
        };
        SampleLostStatus {
            total_count: total + lost,
            total_count_change: lost,
        }
    }
}
