use chronicle_pubsub::{finalize_all, DomainParticipant, Error, QosProfile, Topic};

// Kept alone in this binary: finalize_all acts on process-wide state.
#[test]
fn finalize_requires_all_participants_gone() -> chronicle_pubsub::Result<()> {
    let participant = DomainParticipant::join(901, &QosProfile::default())?;
    let topic = Topic::bind(&participant, "Example Sample")?;
    assert!(matches!(finalize_all(), Err(Error::PreconditionNotMet(_))));

    drop(topic);
    assert!(matches!(finalize_all(), Err(Error::PreconditionNotMet(_))));

    drop(participant);
    finalize_all()?;

    let rejoined = DomainParticipant::join(901, &QosProfile::default())?;
    assert_eq!(rejoined.domain_id(), 901);
    Ok(())
}
