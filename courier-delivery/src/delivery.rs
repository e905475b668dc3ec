//! Sending mail as part of a transaction.
//!
//! Both delivery modes stamp the message, then join the transaction with a
//! participant that performs the send only when the transaction commits.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{Message, prepare_envelope};
use courier_maildir::Maildir;
use courier_transaction::{BoxError, MailParticipant, Transaction};

use crate::{DeliveryError, Transport};

/// Something that can send a message once a transaction commits
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Arrange for `message` to be sent when `transaction` commits.
    ///
    /// Returns the message's `Message-Id`, generated if it had none.
    ///
    /// # Errors
    /// If the message cannot be prepared or staged, or the transaction
    /// refuses the participant
    async fn send(
        &self,
        message: Message,
        transaction: &dyn Transaction,
    ) -> Result<String, DeliveryError>;
}

/// Calls the transport directly when the transaction commits.
///
/// A transport failure at commit time is reported by the transaction's
/// `finish` step; the message is not retried.
pub struct DirectDelivery {
    transport: Arc<dyn Transport>,
}

impl DirectDelivery {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl std::fmt::Debug for DirectDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectDelivery").finish_non_exhaustive()
    }
}

#[async_trait]
impl Delivery for DirectDelivery {
    #[tracing::instrument(skip_all, fields(from = message.sender()))]
    async fn send(
        &self,
        message: Message,
        transaction: &dyn Transaction,
    ) -> Result<String, DeliveryError> {
        let (message_id, message) = prepare_envelope(message)?;
        let transport = Arc::clone(&self.transport);
        let id = message_id.clone();

        let participant = Arc::new(MailParticipant::new(move || async move {
            transport
                .send(message.sender(), message.recipients(), message.data())
                .await
                .map_err(|err| Box::new(DeliveryError::from(err)) as BoxError)?;

            tracing::info!(
                message_id = %id,
                from = message.sender(),
                to = ?message.recipients(),
                "Mail sent"
            );
            Ok(())
        }));

        participant.join_transaction(transaction)?;
        Ok(message_id)
    }
}

/// Writes the message into a maildir queue; a queue worker sends it later.
///
/// The message is staged immediately and published when the transaction
/// commits, or discarded when it aborts.
#[derive(Debug, Clone)]
pub struct QueuedDelivery {
    maildir: Maildir,
}

impl QueuedDelivery {
    pub const fn new(maildir: Maildir) -> Self {
        Self { maildir }
    }

    pub const fn maildir(&self) -> &Maildir {
        &self.maildir
    }
}

#[async_trait]
impl Delivery for QueuedDelivery {
    #[tracing::instrument(skip_all, fields(from = message.sender()))]
    async fn send(
        &self,
        message: Message,
        transaction: &dyn Transaction,
    ) -> Result<String, DeliveryError> {
        let (message_id, message) = prepare_envelope(message)?;
        let staged = Arc::new(self.maildir.stage_message(&message).await?);
        let to_publish = Arc::clone(&staged);

        let participant = Arc::new(
            MailParticipant::new(move || async move {
                to_publish.publish().await.map_err(BoxError::from)
            })
            .on_abort(move || async move { staged.discard().await.map_err(BoxError::from) }),
        );

        participant.join_transaction(transaction)?;

        tracing::debug!(%message_id, "Queued mail pending commit");
        Ok(message_id)
    }
}
