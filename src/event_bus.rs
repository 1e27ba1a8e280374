/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the other threads of a replica and
//! passes each to the handlers registered for its kind.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// The handlers registered for each kind of event, including the default loggers if enabled.
#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) append_block_handlers: Vec<HandlerPtr<AppendBlockEvent>>,
    pub(crate) receive_block_handlers: Vec<HandlerPtr<ReceiveBlockEvent>>,
    pub(crate) replace_chain_handlers: Vec<HandlerPtr<ReplaceChainEvent>>,
    pub(crate) register_peer_handlers: Vec<HandlerPtr<RegisterPeerEvent>>,
    pub(crate) receive_sync_request_handlers: Vec<HandlerPtr<ReceiveSyncRequestEvent>>,
    pub(crate) execute_job_handlers: Vec<HandlerPtr<ExecuteJobEvent>>,
    pub(crate) receive_job_result_handlers: Vec<HandlerPtr<ReceiveJobResultEvent>>,
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        append_block_handler: Option<HandlerPtr<AppendBlockEvent>>,
        receive_block_handler: Option<HandlerPtr<ReceiveBlockEvent>>,
        replace_chain_handler: Option<HandlerPtr<ReplaceChainEvent>>,
        register_peer_handler: Option<HandlerPtr<RegisterPeerEvent>>,
        receive_sync_request_handler: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
        execute_job_handler: Option<HandlerPtr<ExecuteJobEvent>>,
        receive_job_result_handler: Option<HandlerPtr<ReceiveJobResultEvent>>,
    ) -> EventHandlers {
        fn handlers<E: Logger>(log_events: bool, user_handler: Option<HandlerPtr<E>>) -> Vec<HandlerPtr<E>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(E::get_logger());
            }
            handlers.extend(user_handler);
            handlers
        }

        EventHandlers {
            append_block_handlers: handlers(log_events, append_block_handler),
            receive_block_handlers: handlers(log_events, receive_block_handler),
            replace_chain_handlers: handlers(log_events, replace_chain_handler),
            register_peer_handlers: handlers(log_events, register_peer_handler),
            receive_sync_request_handlers: handlers(log_events, receive_sync_request_handler),
            execute_job_handlers: handlers(log_events, execute_job_handler),
            receive_job_result_handlers: handlers(log_events, receive_job_result_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.append_block_handlers.is_empty()
            && self.receive_block_handlers.is_empty()
            && self.replace_chain_handlers.is_empty()
            && self.register_peer_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.execute_job_handlers.is_empty()
            && self.receive_job_result_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::AppendBlock(append_block_event) =>
                self.append_block_handlers.iter().for_each(|handler| handler(&append_block_event)),

            Event::ReceiveBlock(receive_block_event) =>
                self.receive_block_handlers.iter().for_each(|handler| handler(&receive_block_event)),

            Event::ReplaceChain(replace_chain_event) =>
                self.replace_chain_handlers.iter().for_each(|handler| handler(&replace_chain_event)),

            Event::RegisterPeer(register_peer_event) =>
                self.register_peer_handlers.iter().for_each(|handler| handler(&register_peer_event)),

            Event::ReceiveSyncRequest(receive_sync_request_event) =>
                self.receive_sync_request_handlers.iter().for_each(|handler| handler(&receive_sync_request_event)),

            Event::ExecuteJob(execute_job_event) =>
                self.execute_job_handlers.iter().for_each(|handler| handler(&execute_job_event)),

            Event::ReceiveJobResult(receive_job_result_event) =>
                self.receive_job_result_handlers.iter().for_each(|handler| handler(&receive_job_result_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    poll_interval: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(poll_interval) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone; only the shutdown signal remains to wait for.
            Err(RecvTimeoutError::Disconnected) => {
                let _ = shutdown_signal.recv();
                return;
            }
        }
    })
}
