use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use booking_cell::{BookingRequest, BookingService, FreedSlot};
use shared_models::{
    Appointment, AppointmentStatus, AppointmentType, ContactInfo, NewAppointment,
    NotificationDispatcher, NotificationMode, Provider, ProviderSchedule, ReplyAction,
    SchedulingError, WaitlistEntry,
};
use shared_storage::{MemoryStore, SchedulingStore};
use waitlist_cell::{
    ConfirmationService, JobQueue, MatchOutcome, MemoryJobQueue, QueueReleaseSink, SchedulingJob,
    TimeoutOutcome, WaitlistMatcherService, WaitlistWorkerService,
};

const TIMEOUT_SECS: i64 = 1800;

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, NotificationMode)>>,
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send_appointment_notification(
        &self,
        appointment_id: Uuid,
        mode: NotificationMode,
    ) -> Result<(), SchedulingError> {
        self.sent.lock().await.push((appointment_id, mode));
        Ok(())
    }
}

type Sink = QueueReleaseSink<MemoryJobQueue>;

struct Fixture {
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    queue: Arc<MemoryJobQueue>,
    booking: Arc<BookingService<MemoryStore, RecordingNotifier, Sink>>,
    matcher: Arc<WaitlistMatcherService<MemoryStore, RecordingNotifier, Sink, MemoryJobQueue>>,
    confirmation: Arc<ConfirmationService<MemoryStore, RecordingNotifier, MemoryJobQueue>>,
    worker: WaitlistWorkerService<MemoryStore, RecordingNotifier, Sink, MemoryJobQueue>,
    provider_id: Uuid,
    type_id: Uuid,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let queue = Arc::new(MemoryJobQueue::new(3, 30));
    let sink = Arc::new(QueueReleaseSink::new(Arc::clone(&queue)));

    let provider_id = Uuid::new_v4();
    store
        .put_provider(Provider {
            id: provider_id,
            name: "Dr. Ada".to_string(),
            roles: vec!["gp".to_string()],
            timezone: "Europe/Amsterdam".to_string(),
            is_active: true,
        })
        .await;

    let type_id = Uuid::new_v4();
    store
        .put_appointment_type(AppointmentType {
            id: type_id,
            name: "consultation".to_string(),
            duration_min: 30,
            buffer_before_min: 0,
            buffer_after_min: 0,
            required_resource_types: vec![],
            required_provider_roles: vec![],
        })
        .await;

    let booking = Arc::new(BookingService::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        sink,
    ));
    let matcher = Arc::new(WaitlistMatcherService::new(
        Arc::clone(&store),
        Arc::clone(&booking),
        Arc::clone(&queue),
    ));
    let confirmation = Arc::new(ConfirmationService::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::clone(&queue),
        TIMEOUT_SECS,
    ));
    let worker = WaitlistWorkerService::new(
        "test-worker",
        1,
        Arc::clone(&queue),
        Arc::clone(&matcher),
        Arc::clone(&confirmation),
    );

    Fixture {
        store,
        notifier,
        queue,
        booking,
        matcher,
        confirmation,
        worker,
        provider_id,
        type_id,
    }
}

fn utc(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
}

fn entry(fx: &Fixture, priority: i32, created_at: DateTime<Utc>) -> WaitlistEntry {
    WaitlistEntry {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        requested_type_ids: vec![fx.type_id],
        preferred_providers: vec![],
        earliest_utc: None,
        latest_utc: None,
        priority,
        processed: false,
        contact: Some(ContactInfo {
            email: None,
            phone: Some("+31600000001".to_string()),
        }),
        created_at,
    }
}

fn freed(fx: &Fixture, start: DateTime<Utc>, end: DateTime<Utc>) -> FreedSlot {
    FreedSlot {
        start_utc: start,
        end_utc: end,
        provider_id: fx.provider_id,
        type_id: fx.type_id,
    }
}

#[tokio::test]
async fn highest_priority_then_fifo_wins_the_slot() {
    let fx = fixture().await;
    let early_low = entry(&fx, 1, utc(0, 0));
    let late_high = entry(&fx, 5, utc(0, 30));
    let early_high = entry(&fx, 5, utc(0, 10));
    for e in [&early_low, &late_high, &early_high] {
        fx.store.put_waitlist_entry(e.clone()).await;
    }

    let outcome = fx
        .matcher
        .handle_cancelled_slot(&freed(&fx, utc(9, 0), utc(9, 30)))
        .await
        .unwrap();

    let (appointment_id, waitlist_entry_id) = match outcome {
        MatchOutcome::Offered {
            appointment_id,
            waitlist_entry_id,
        } => (appointment_id, waitlist_entry_id),
        other => panic!("expected an offer, got {other:?}"),
    };
    assert_eq!(waitlist_entry_id, early_high.id, "FIFO within equal priority");

    let appointment = fx.store.get_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Tentative);
    assert_eq!(appointment.patient_id, early_high.patient_id);

    assert!(fx.store.get_waitlist_entry(early_high.id).await.unwrap().processed);
    assert!(!fx.store.get_waitlist_entry(late_high.id).await.unwrap().processed);
    assert!(!fx.store.get_waitlist_entry(early_low.id).await.unwrap().processed);
}

#[tokio::test]
async fn window_bounds_and_type_filter_apply() {
    let fx = fixture().await;

    let mut too_late = entry(&fx, 9, utc(0, 0));
    too_late.earliest_utc = Some(utc(12, 0)); // wants later than the slot
    let mut wrong_type = entry(&fx, 9, utc(0, 1));
    wrong_type.requested_type_ids = vec![Uuid::new_v4()];
    let mut any_type = entry(&fx, 1, utc(0, 2));
    any_type.requested_type_ids = vec![];
    for e in [&too_late, &wrong_type, &any_type] {
        fx.store.put_waitlist_entry(e.clone()).await;
    }

    let outcome = fx
        .matcher
        .handle_cancelled_slot(&freed(&fx, utc(9, 0), utc(9, 30)))
        .await
        .unwrap();

    assert_matches!(
        outcome,
        MatchOutcome::Offered { waitlist_entry_id, .. } if waitlist_entry_id == any_type.id
    );
}

#[tokio::test]
async fn losing_the_race_leaves_the_entry_unprocessed() {
    let fx = fixture().await;
    let candidate = entry(&fx, 1, utc(0, 0));
    fx.store.put_waitlist_entry(candidate.clone()).await;

    // A direct booking takes the interval before the matcher runs.
    fx.booking
        .book(BookingRequest {
            patient_id: Uuid::new_v4(),
            provider_ids: vec![fx.provider_id],
            type_id: fx.type_id,
            start_utc: utc(9, 0),
            end_utc: utc(9, 30),
            tentative: false,
            required_resource_ids: vec![],
            parent_series_id: None,
            contact: None,
        })
        .await
        .unwrap();

    let outcome = fx
        .matcher
        .handle_cancelled_slot(&freed(&fx, utc(9, 0), utc(9, 30)))
        .await
        .unwrap();

    assert_eq!(outcome, MatchOutcome::LostRace);
    assert!(!fx.store.get_waitlist_entry(candidate.id).await.unwrap().processed);
}

#[tokio::test]
async fn empty_waitlist_yields_no_candidate() {
    let fx = fixture().await;
    let outcome = fx
        .matcher
        .handle_cancelled_slot(&freed(&fx, utc(9, 0), utc(9, 30)))
        .await
        .unwrap();
    assert_eq!(outcome, MatchOutcome::NoCandidate);
}

#[tokio::test]
async fn confirm_job_notifies_and_arms_the_timeout() {
    let fx = fixture().await;
    let appointment_id = Uuid::new_v4();
    let entry_id = Uuid::new_v4();

    fx.confirmation
        .handle_confirm_job(appointment_id, entry_id)
        .await
        .unwrap();

    let sent = fx.notifier.sent.lock().await;
    assert_eq!(
        sent.as_slice(),
        &[(appointment_id, NotificationMode::ConfirmWaitlist)]
    );

    let delayed = fx.queue.delayed_jobs().await;
    assert_eq!(delayed.len(), 1);
    assert_eq!(
        delayed[0].job,
        SchedulingJob::WaitlistConfirmationTimeout {
            appointment_id,
            waitlist_entry_id: entry_id,
        }
    );
    let run_at = delayed[0].run_at.expect("timeout jobs carry a due time");
    let delta = run_at - Utc::now();
    assert!(
        delta > Duration::seconds(TIMEOUT_SECS - 10) && delta <= Duration::seconds(TIMEOUT_SECS),
        "timeout due in {delta:?}"
    );
}

async fn tentative_offer(fx: &Fixture) -> (Uuid, Uuid) {
    let candidate = entry(fx, 1, utc(0, 0));
    fx.store.put_waitlist_entry(candidate.clone()).await;
    let outcome = fx
        .matcher
        .handle_cancelled_slot(&freed(fx, utc(9, 0), utc(9, 30)))
        .await
        .unwrap();
    match outcome {
        MatchOutcome::Offered { appointment_id, .. } => (appointment_id, candidate.id),
        other => panic!("expected an offer, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_cancels_a_still_tentative_offer_and_refeeds_the_slot() {
    let fx = fixture().await;
    let (appointment_id, entry_id) = tentative_offer(&fx).await;

    let outcome = fx
        .confirmation
        .handle_timeout(appointment_id, entry_id)
        .await
        .unwrap();
    assert_eq!(outcome, TimeoutOutcome::Expired);

    let appointment = fx.store.get_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);

    // Exactly one backfill job per provider goes back through the queue.
    let mut backfills = 0;
    while let Some(job) = fx.queue.dequeue("probe").await.unwrap() {
        if matches!(job.job, SchedulingJob::ProcessCancelledSlot { .. }) {
            backfills += 1;
        }
        fx.queue.complete(job.job_id).await.unwrap();
    }
    assert_eq!(backfills, 1);
}

#[tokio::test]
async fn timeout_is_a_noop_once_the_patient_confirmed() {
    let fx = fixture().await;
    let (appointment_id, entry_id) = tentative_offer(&fx).await;

    fx.store
        .transition_status(
            appointment_id,
            &[AppointmentStatus::Tentative],
            AppointmentStatus::Confirmed,
        )
        .await
        .unwrap()
        .expect("confirm wins the race");

    let first = fx
        .confirmation
        .handle_timeout(appointment_id, entry_id)
        .await
        .unwrap();
    let second = fx
        .confirmation
        .handle_timeout(appointment_id, entry_id)
        .await
        .unwrap();

    assert_eq!(first, TimeoutOutcome::AlreadyResolved);
    assert_eq!(second, TimeoutOutcome::AlreadyResolved);
    let appointment = fx.store.get_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn yes_reply_confirms_the_latest_tentative_appointment() {
    let fx = fixture().await;
    let (appointment_id, _) = tentative_offer(&fx).await;

    let outcome = fx
        .confirmation
        .handle_reply("+31600000001", "Yes please")
        .await
        .unwrap();

    assert_eq!(outcome.action, ReplyAction::Confirmed);
    assert_eq!(outcome.appointment_id, Some(appointment_id));
    let appointment = fx.store.get_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn no_reply_cancels_and_releases_the_interval() {
    let fx = fixture().await;
    let (appointment_id, _) = tentative_offer(&fx).await;

    let outcome = fx
        .confirmation
        .handle_reply("+31600000001", "no thanks")
        .await
        .unwrap();

    assert_eq!(outcome.action, ReplyAction::Cancelled);
    let appointment = fx.store.get_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);

    let mut saw_backfill = false;
    while let Some(job) = fx.queue.dequeue("probe").await.unwrap() {
        saw_backfill |= matches!(job.job, SchedulingJob::ProcessCancelledSlot { .. });
        fx.queue.complete(job.job_id).await.unwrap();
    }
    assert!(saw_backfill);
}

#[tokio::test]
async fn garbled_reply_changes_nothing() {
    let fx = fixture().await;
    let (appointment_id, _) = tentative_offer(&fx).await;

    let outcome = fx
        .confirmation
        .handle_reply("+31600000001", "maybe later?")
        .await
        .unwrap();

    assert_eq!(outcome.action, ReplyAction::Unrecognized);
    let appointment = fx.store.get_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Tentative);
}

#[tokio::test]
async fn reply_without_tentative_appointment_is_unrecognized() {
    let fx = fixture().await;
    let outcome = fx
        .confirmation
        .handle_reply("+31600000999", "yes")
        .await
        .unwrap();
    assert_eq!(outcome.action, ReplyAction::Unrecognized);
    assert_eq!(outcome.appointment_id, None);
}

#[tokio::test]
async fn job_for_a_vanished_appointment_completes_as_a_noop() {
    let fx = fixture().await;
    // A timeout job may outlive its appointment; redelivery cannot help.
    fx.queue
        .enqueue(SchedulingJob::WaitlistConfirmationTimeout {
            appointment_id: Uuid::new_v4(),
            waitlist_entry_id: Uuid::new_v4(),
        })
        .await
        .unwrap();

    let handled = fx.worker.run_pending().await.unwrap();

    assert_eq!(handled, 1);
    assert!(fx.queue.dead_jobs().await.is_empty());
    assert!(fx.queue.delayed_jobs().await.is_empty());
    assert_eq!(fx.queue.pending_len().await, 0);
}

/// Store double for the reply race: the lookup still sees a tentative
/// appointment but the status write finds it already moved on.
struct MovedOnStore {
    appointment: Appointment,
}

#[async_trait]
impl SchedulingStore for MovedOnStore {
    async fn get_provider(&self, _id: Uuid) -> Result<Provider, SchedulingError> {
        unimplemented!()
    }

    async fn get_schedule(&self, _provider_id: Uuid) -> Result<ProviderSchedule, SchedulingError> {
        unimplemented!()
    }

    async fn get_appointment_type(&self, _id: Uuid) -> Result<AppointmentType, SchedulingError> {
        unimplemented!()
    }

    async fn get_appointment(&self, _id: Uuid) -> Result<Appointment, SchedulingError> {
        Ok(self.appointment.clone())
    }

    async fn blocking_appointments_in_range(
        &self,
        _provider_id: Uuid,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        unimplemented!()
    }

    async fn try_insert_appointment(
        &self,
        _new: NewAppointment,
    ) -> Result<Appointment, SchedulingError> {
        unimplemented!()
    }

    async fn transition_status(
        &self,
        _id: Uuid,
        _expected: &[AppointmentStatus],
        _next: AppointmentStatus,
    ) -> Result<Option<Appointment>, SchedulingError> {
        Ok(None)
    }

    async fn best_waitlist_candidate(
        &self,
        _freed_start: DateTime<Utc>,
        _freed_end: DateTime<Utc>,
        _type_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, SchedulingError> {
        unimplemented!()
    }

    async fn get_waitlist_entry(&self, _id: Uuid) -> Result<WaitlistEntry, SchedulingError> {
        unimplemented!()
    }

    async fn set_waitlist_processed(
        &self,
        _id: Uuid,
        _processed: bool,
    ) -> Result<(), SchedulingError> {
        unimplemented!()
    }

    async fn latest_tentative_for_phone(
        &self,
        _phone: &str,
    ) -> Result<Option<Appointment>, SchedulingError> {
        Ok(Some(self.appointment.clone()))
    }
}

#[tokio::test]
async fn reply_that_loses_the_race_reports_no_change() {
    let appointment = Appointment {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        provider_ids: vec![Uuid::new_v4()],
        type_id: Uuid::new_v4(),
        start_utc: utc(9, 0),
        end_utc: utc(9, 30),
        status: AppointmentStatus::Tentative,
        required_resource_ids: vec![],
        parent_series_id: None,
        contact: Some(ContactInfo {
            email: None,
            phone: Some("+31600000001".to_string()),
        }),
        created_at: utc(0, 0),
        updated_at: utc(0, 0),
    };
    let appointment_id = appointment.id;
    let queue = Arc::new(MemoryJobQueue::new(3, 30));
    let confirmation = ConfirmationService::new(
        Arc::new(MovedOnStore { appointment }),
        Arc::new(RecordingNotifier::default()),
        Arc::clone(&queue),
        TIMEOUT_SECS,
    );

    let yes = confirmation.handle_reply("+31600000001", "yes").await.unwrap();
    assert_eq!(yes.action, ReplyAction::Unrecognized);
    assert_eq!(yes.appointment_id, Some(appointment_id));

    let no = confirmation.handle_reply("+31600000001", "no").await.unwrap();
    assert_eq!(no.action, ReplyAction::Unrecognized);

    // A decline that changed nothing must not re-release the interval.
    assert_eq!(queue.pending_len().await, 0);
}

#[tokio::test]
async fn cancellation_chain_backfills_the_next_candidate_after_expiry() {
    let fx = fixture().await;

    let first = entry(&fx, 5, utc(0, 0));
    let second = entry(&fx, 1, utc(0, 5));
    fx.store.put_waitlist_entry(first.clone()).await;
    fx.store.put_waitlist_entry(second.clone()).await;

    // A booked appointment is cancelled; the sink feeds the queue.
    let booked = fx
        .booking
        .book(BookingRequest {
            patient_id: Uuid::new_v4(),
            provider_ids: vec![fx.provider_id],
            type_id: fx.type_id,
            start_utc: utc(9, 0),
            end_utc: utc(9, 30),
            tentative: false,
            required_resource_ids: vec![],
            parent_series_id: None,
            contact: None,
        })
        .await
        .unwrap();
    fx.booking.cancel(booked.id).await.unwrap();

    // Drain: backfill books the first candidate tentatively and the confirm
    // job arms the timeout.
    fx.worker.run_pending().await.unwrap();
    assert!(fx.store.get_waitlist_entry(first.id).await.unwrap().processed);
    let delayed = fx.queue.delayed_jobs().await;
    assert_eq!(delayed.len(), 1);
    let timeout_job_id = delayed[0].job_id;
    let offered_to_first = match &delayed[0].job {
        SchedulingJob::WaitlistConfirmationTimeout { appointment_id, .. } => *appointment_id,
        other => panic!("expected a timeout job, got {other:?}"),
    };

    // The first candidate never answers; the timeout fires and the chain
    // moves on to the second candidate.
    fx.queue.make_due(timeout_job_id).await;
    fx.worker.run_pending().await.unwrap();

    let expired = fx.store.get_appointment(offered_to_first).await.unwrap();
    assert_eq!(expired.status, AppointmentStatus::Cancelled);
    assert!(fx.store.get_waitlist_entry(second.id).await.unwrap().processed);

    // The second offer armed its own timeout.
    let delayed = fx.queue.delayed_jobs().await;
    assert_eq!(delayed.len(), 1);
    assert_ne!(delayed[0].job_id, timeout_job_id);
}
