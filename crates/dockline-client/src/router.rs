//! Inbound frame dispatch.
//!
//! Routes each parsed [`ServerFrame`] into store mutations and client
//! events. Returns the frame to send back, if any, so the dispatch itself
//! stays free of socket handles and unit-testable.

use crate::client::ClientEvent;
use crate::store::ChatStore;
use dockline_types::{ClientFrame, ReadReceipt, ServerFrame, TaskStatus};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

pub(crate) fn route_frame(
    frame: ServerFrame,
    store: &Arc<ChatStore>,
    events: &broadcast::Sender<ClientEvent>,
) -> Option<ClientFrame> {
    match frame {
        ServerFrame::ConnectionEstablished { user_id, .. } => {
            info!(target: "dockline::ws", "Connection established for user {}", user_id);
            // Re-attach to whichever session the UI is looking at
            store
                .active_session()
                .map(|session_id| ClientFrame::Subscribe { session_id })
        }

        ServerFrame::ChatMessage {
            message, session_id, ..
        } => {
            if store.active_session() != Some(session_id) {
                trace!(
                    target: "dockline::router",
                    "Dropping message for inactive session {}", session_id
                );
                return None;
            }
            if store.push_message(message.clone()) {
                let _ = events.send(ClientEvent::MessageAdded(message));
            } else {
                debug!(
                    target: "dockline::router",
                    "Duplicate message {} ignored", message.id
                );
            }
            None
        }

        ServerFrame::MessageChunk {
            message_id,
            chunk,
            is_first,
            is_last,
            ..
        } => {
            if is_first {
                store.start_stream(&message_id);
            }
            store.append_chunk(&message_id, &chunk);
            if is_last {
                if let Some(text) = store.finish_stream(&message_id) {
                    if !store.set_message_text(&message_id, &text) {
                        debug!(
                            target: "dockline::router",
                            "No message entry for finished stream {}", message_id
                        );
                    }
                    let _ = events.send(ClientEvent::StreamCompleted { message_id, text });
                }
            }
            None
        }

        ServerFrame::TypingStatus {
            user_id,
            is_typing,
            session_id,
            ..
        } => {
            store.set_typing(&user_id, session_id, is_typing);
            let _ = events.send(ClientEvent::TypingChanged {
                user_id,
                session_id,
                is_typing,
            });
            None
        }

        ServerFrame::ReadReceipt {
            message_id,
            user_id,
            timestamp,
            ..
        } => {
            let receipt = ReadReceipt {
                user_id: user_id.clone(),
                timestamp,
            };
            if store.mark_read(&message_id, receipt) {
                let _ = events.send(ClientEvent::ReadReceiptRecorded {
                    message_id,
                    user_id,
                });
            }
            None
        }

        ServerFrame::TaskUpdate {
            task_id,
            session_id,
            status,
            progress,
            message,
            data,
            timestamp,
        } => {
            let task = TaskStatus {
                task_id,
                session_id,
                state: status,
                progress,
                message,
                data,
                updated_at: timestamp,
            };
            store.update_task(task.clone());
            let _ = events.send(ClientEvent::TaskUpdated(task));
            None
        }

        ServerFrame::Pong { .. } => {
            trace!(target: "dockline::ws::ping", "Received pong");
            None
        }

        ServerFrame::Error { error } => {
            warn!(target: "dockline::ws", "Backend error: {}", error);
            None
        }
    }
}
