//! Per-agent mailboxes.

use super::ControlChannel;
use crate::agent::domain::AgentId;
use crate::bus::domain::{
    BroadcastReport, BusError, BusResult, Delivery, Message, MessageId, Receipt, Recipient,
    SendRequest, SequenceNumber,
};
use crate::cancel::CancellationToken;
use crate::config::BusSettings;
use mockable::Clock;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<Message>,
    last_sequence: SequenceNumber,
    closed: bool,
}

#[derive(Debug, Default)]
struct Mailbox {
    queue: Mutex<Queue>,
    arrivals: Notify,
}

/// Ordered, addressable delivery between agents and from the runtime.
pub struct MessageBus<C>
where
    C: Clock + Send + Sync,
{
    mailboxes: RwLock<HashMap<AgentId, Arc<Mailbox>>>,
    high_water_mark: Option<usize>,
    control: Arc<ControlChannel>,
    clock: Arc<C>,
}

impl<C> MessageBus<C>
where
    C: Clock + Send + Sync,
{
    /// Creates a bus with the given limits.
    #[must_use]
    pub fn new(settings: &BusSettings, clock: Arc<C>) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            high_water_mark: settings.mailbox_high_water_mark,
            control: Arc::new(ControlChannel::new(settings.event_buffer)),
            clock,
        }
    }

    /// Returns the control channel shared with the other components.
    #[must_use]
    pub fn control(&self) -> Arc<ControlChannel> {
        Arc::clone(&self.control)
    }

    /// Returns the clock used to stamp messages and events.
    #[must_use]
    pub fn clock(&self) -> Arc<C> {
        Arc::clone(&self.clock)
    }

    /// Opens a mailbox for `agent_id`. Opening an open mailbox is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::LockPoisoned`] when the mailbox table is poisoned.
    pub fn open_mailbox(&self, agent_id: AgentId) -> BusResult<()> {
        let mut mailboxes = self.mailboxes.write().map_err(|_| BusError::LockPoisoned)?;
        mailboxes.entry(agent_id).or_default();
        tracing::debug!(agent_id = %agent_id, "mailbox opened");
        Ok(())
    }

    /// Closes and drops the mailbox for `agent_id`. Idempotent.
    ///
    /// Queued messages are discarded and suspended receivers wake with
    /// [`BusError::MailboxClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::LockPoisoned`] when bus state is poisoned.
    pub fn close_mailbox(&self, agent_id: AgentId) -> BusResult<()> {
        let removed = self
            .mailboxes
            .write()
            .map_err(|_| BusError::LockPoisoned)?
            .remove(&agent_id);
        let Some(mailbox) = removed else {
            return Ok(());
        };
        let discarded = {
            let mut queue = mailbox.queue.lock().map_err(|_| BusError::LockPoisoned)?;
            queue.closed = true;
            let count = queue.messages.len();
            queue.messages.clear();
            count
        };
        mailbox.arrivals.notify_waiters();
        tracing::debug!(agent_id = %agent_id, discarded, "mailbox closed");
        Ok(())
    }

    /// Returns whether `agent_id` has an open mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::LockPoisoned`] when the mailbox table is poisoned.
    pub fn has_mailbox(&self, agent_id: AgentId) -> BusResult<bool> {
        Ok(self
            .mailboxes
            .read()
            .map_err(|_| BusError::LockPoisoned)?
            .contains_key(&agent_id))
    }

    /// Enqueues a message without suspending.
    ///
    /// A broadcast reaches every mailbox open at call time. Mailboxes at their
    /// high-water mark are reported in [`BroadcastReport::overflowed`]
    /// instead of failing the whole fan-out.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownRecipient`] when the target has no mailbox,
    /// [`BusError::MailboxOverflow`] when a direct target is full, or
    /// [`BusError::LockPoisoned`] when bus state is poisoned.
    pub fn send(&self, request: SendRequest) -> BusResult<Delivery> {
        match request.recipient {
            Recipient::Agent(agent_id) => {
                let mailbox = self.mailbox(agent_id)?;
                let receipt = self.enqueue(agent_id, &mailbox, &request, false)?;
                Ok(Delivery::Direct(receipt))
            }
            Recipient::Broadcast => self.broadcast(&request).map(Delivery::Broadcast),
        }
    }

    fn broadcast(&self, request: &SendRequest) -> BusResult<BroadcastReport> {
        let mut targets: Vec<(AgentId, Arc<Mailbox>)> = self
            .mailboxes
            .read()
            .map_err(|_| BusError::LockPoisoned)?
            .iter()
            .map(|(id, mailbox)| (*id, Arc::clone(mailbox)))
            .collect();
        targets.sort_by_key(|(id, _)| *id);

        let mut report = BroadcastReport::default();
        for (agent_id, mailbox) in targets {
            match self.enqueue(agent_id, &mailbox, request, true) {
                Ok(receipt) => report.delivered.push(receipt),
                Err(BusError::MailboxOverflow { .. }) => report.overflowed.push(agent_id),
                Err(BusError::MailboxClosed(_)) => {}
                Err(error) => return Err(error),
            }
        }
        tracing::debug!(
            delivered = report.delivered.len(),
            overflowed = report.overflowed.len(),
            "broadcast sent"
        );
        Ok(report)
    }

    fn enqueue(
        &self,
        agent_id: AgentId,
        mailbox: &Mailbox,
        request: &SendRequest,
        broadcast: bool,
    ) -> BusResult<Receipt> {
        let receipt = {
            let mut queue = mailbox.queue.lock().map_err(|_| BusError::LockPoisoned)?;
            if queue.closed {
                return Err(BusError::MailboxClosed(agent_id));
            }
            if let Some(limit) = self.high_water_mark
                && queue.messages.len() >= limit
            {
                return Err(BusError::MailboxOverflow { agent_id, limit });
            }
            let sequence = queue.last_sequence.next();
            queue.last_sequence = sequence;
            let message = Message {
                id: MessageId::new(),
                sender: request.sender,
                recipient: agent_id,
                sequence,
                payload: request.payload.clone(),
                correlation_id: request.correlation_id,
                broadcast,
                enqueued_at: self.clock.utc(),
            };
            let issued = Receipt {
                message_id: message.id,
                recipient: agent_id,
                sequence,
            };
            queue.messages.push_back(message);
            issued
        };
        mailbox.arrivals.notify_one();
        tracing::debug!(
            agent_id = %agent_id,
            sequence = %receipt.sequence,
            "message enqueued"
        );
        Ok(receipt)
    }

    /// Returns the next message without suspending.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownRecipient`] when the agent has no mailbox,
    /// or [`BusError::LockPoisoned`] when bus state is poisoned.
    pub fn try_receive(&self, agent_id: AgentId) -> BusResult<Option<Message>> {
        let mailbox = self.mailbox(agent_id)?;
        let mut queue = mailbox.queue.lock().map_err(|_| BusError::LockPoisoned)?;
        Ok(queue.messages.pop_front())
    }

    /// Returns the next message, suspending until one arrives.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Cancelled`] when `cancel` fires first (no message
    /// is consumed), [`BusError::MailboxClosed`] when the mailbox is released
    /// while waiting, [`BusError::UnknownRecipient`] when the agent has no
    /// mailbox, or [`BusError::LockPoisoned`] when bus state is poisoned.
    pub async fn receive(
        &self,
        agent_id: AgentId,
        cancel: &CancellationToken,
    ) -> BusResult<Message> {
        let mailbox = self.mailbox(agent_id)?;
        loop {
            let mut arrival = std::pin::pin!(mailbox.arrivals.notified());
            arrival.as_mut().enable();

            {
                let mut queue = mailbox.queue.lock().map_err(|_| BusError::LockPoisoned)?;
                if let Some(message) = queue.messages.pop_front() {
                    return Ok(message);
                }
                if queue.closed {
                    return Err(BusError::MailboxClosed(agent_id));
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(BusError::Cancelled(agent_id)),
                () = &mut arrival => {}
            }
        }
    }

    /// Returns the number of queued messages for `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownRecipient`] when the agent has no mailbox,
    /// or [`BusError::LockPoisoned`] when bus state is poisoned.
    pub fn pending(&self, agent_id: AgentId) -> BusResult<usize> {
        let mailbox = self.mailbox(agent_id)?;
        let queue = mailbox.queue.lock().map_err(|_| BusError::LockPoisoned)?;
        Ok(queue.messages.len())
    }

    fn mailbox(&self, agent_id: AgentId) -> BusResult<Arc<Mailbox>> {
        self.mailboxes
            .read()
            .map_err(|_| BusError::LockPoisoned)?
            .get(&agent_id)
            .cloned()
            .ok_or(BusError::UnknownRecipient(agent_id))
    }
}
