//! Client side of the coordinator mailbox.

use std::collections::BTreeMap;

use extensions_bridge::{ControlMessage, ControlResponse, TabEvent, TabMessage};
use sheetpilot_core_types::TabId;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::SchedulerError;
use crate::events::{UiEvent, UiEventBus};
use crate::model::RunState;

const UI_EVENT_CAPACITY: usize = 256;

#[derive(Debug)]
pub(crate) enum Envelope {
    Control {
        message: ControlMessage,
        reply: oneshot::Sender<ControlResponse>,
    },
    Tab {
        tab: TabId,
        message: TabMessage,
    },
    TabEvent(TabEvent),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Receiving end, consumed by [`crate::Coordinator::new`].
pub struct Mailbox {
    pub(crate) rx: mpsc::Receiver<Envelope>,
    pub(crate) events: UiEventBus,
}

/// Cheap, cloneable sender for control messages, tab traffic and tab
/// lifecycle events.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Envelope>,
    events: UiEventBus,
}

impl CoordinatorHandle {
    pub fn channel(capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (events, _) = broadcast::channel(UI_EVENT_CAPACITY);
        (
            Self {
                tx,
                events: events.clone(),
            },
            Mailbox { rx, events },
        )
    }

    /// Sends a control message and waits for the reply.
    pub async fn request(&self, message: ControlMessage) -> Result<ControlResponse, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Control { message, reply })
            .await
            .map_err(|_| SchedulerError::CoordinatorGone)?;
        rx.await.map_err(|_| SchedulerError::CoordinatorGone)
    }

    /// Like [`request`](Self::request) but folds a dead coordinator into a
    /// failure response.
    pub async fn control(&self, message: ControlMessage) -> ControlResponse {
        match self.request(message).await {
            Ok(response) => response,
            Err(err) => ControlResponse::failure(err.to_string()),
        }
    }

    /// A message from the executor living in `tab`.
    pub async fn tab_message(&self, tab: TabId, message: TabMessage) -> Result<(), SchedulerError> {
        self.tx
            .send(Envelope::Tab { tab, message })
            .await
            .map_err(|_| SchedulerError::CoordinatorGone)
    }

    pub async fn tab_event(&self, event: TabEvent) -> Result<(), SchedulerError> {
        self.tx
            .send(Envelope::TabEvent(event))
            .await
            .map_err(|_| SchedulerError::CoordinatorGone)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> Result<RunState, SchedulerError> {
        let response = self.request(ControlMessage::GetState).await?;
        let data = expect_data(response)?;
        serde_json::from_value(data).map_err(|err| SchedulerError::Protocol(err.to_string()))
    }

    pub async fn variables(&self) -> Result<BTreeMap<String, String>, SchedulerError> {
        let response = self.request(ControlMessage::GetVariables).await?;
        let data = expect_data(response)?;
        serde_json::from_value(data).map_err(|err| SchedulerError::Protocol(err.to_string()))
    }

    /// Flushes pending writes and stops the actor.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Shutdown { reply })
            .await
            .map_err(|_| SchedulerError::CoordinatorGone)?;
        rx.await.map_err(|_| SchedulerError::CoordinatorGone)
    }
}

fn expect_data(response: ControlResponse) -> Result<serde_json::Value, SchedulerError> {
    if !response.success {
        return Err(SchedulerError::Protocol(
            response.error.unwrap_or_else(|| "request failed".to_string()),
        ));
    }
    response
        .data
        .ok_or_else(|| SchedulerError::Protocol("reply carried no data".to_string()))
}
