use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chat::{
    ActiveThreadContext, AudioRecorder, MessageSender, PresenceSetter, ThreadSubscription,
};
use crate::common::types::{Thread, ThreadId};
use crate::common::{ChatCommand, ChatEvent};
use crate::storage::DocumentStore;

use super::state::ClientState;

/// Drives the chat screen: applies front-end commands, keeps the active
/// thread subscription and reports what happened as events.
pub struct ChatClient {
    store: Arc<dyn DocumentStore>,
    sender: MessageSender,
    presence: PresenceSetter,
    recorder: AudioRecorder,
    state: ClientState,
    active: Option<ActiveThreadContext>,
    subscription: Option<ThreadSubscription>,
    event_sender: mpsc::Sender<ChatEvent>,
    command_receiver: mpsc::Receiver<ChatCommand>,
}

impl ChatClient {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sender: MessageSender,
        recorder: AudioRecorder,
        event_sender: mpsc::Sender<ChatEvent>,
        command_receiver: mpsc::Receiver<ChatCommand>,
    ) -> Self {
        Self {
            presence: PresenceSetter::new(store.clone()),
            store,
            sender,
            recorder,
            state: ClientState::new(),
            active: None,
            subscription: None,
            event_sender,
            command_receiver,
        }
    }

    /// Run until the command channel closes. Marks the user online for the duration.
    pub async fn run(mut self) -> ClientState {
        let user_id = self.sender.session().user_id().clone();
        self.presence.set_online(&user_id, true).await;
        log::info!("Chat client started for {user_id}");

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command).await;
                    } else {
                        break;
                    }
                }
                update = next_thread_update(&mut self.subscription) => {
                    self.handle_thread_update(update).await;
                }
            }
        }

        self.subscription = None;
        self.presence.set_online(&user_id, false).await;
        log::info!("Chat client stopped for {user_id}");
        self.state
    }

    async fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::SetText(text) => self.state.composer.set_text(text),
            ChatCommand::PushEmoji(emoji) => self.state.composer.push_emoji(&emoji),
            ChatCommand::AttachImage(image) => self.state.composer.attach_image(image),
            ChatCommand::DetachImage => {
                self.state.composer.detach_image();
            }
            ChatCommand::Send => self.send_draft().await,
            ChatCommand::ToggleRecording => self.toggle_recording().await,
            ChatCommand::SetPresence(online) => {
                let user_id = self.sender.session().user_id().clone();
                self.presence.set_online(&user_id, online).await;
            }
            ChatCommand::SwitchThread(active) => self.switch_thread(active).await,
        }
    }

    async fn send_draft(&mut self) {
        let Some(active) = self.active.as_ref() else {
            self.notify("Select a chat before sending").await;
            return;
        };

        let result = self.sender.send_draft(active, &mut self.state.composer).await;
        match result {
            Ok(Some(message)) => self.emit(ChatEvent::MessageSent(message)).await,
            Ok(None) => {}
            Err(err) => self.emit(ChatEvent::SendFailed(err.to_string())).await,
        }
    }

    async fn toggle_recording(&mut self) {
        if !self.recorder.is_recording() {
            match self.recorder.start() {
                Ok(()) => self.emit(ChatEvent::RecordingStarted).await,
                Err(err) => self.notify(err.to_string()).await,
            }
            return;
        }

        let Some(clip) = self.recorder.stop() else {
            return;
        };
        self.emit(ChatEvent::RecordingStopped).await;

        let Some(active) = self.active.as_ref() else {
            self.notify("Recording discarded: no chat selected").await;
            return;
        };

        // Shown as a pending bubble until the upload finishes.
        self.state.composer.attach_audio(clip.clone());
        let result = self.sender.send_audio(active, &clip).await;
        self.state.composer.clear_audio();

        match result {
            Ok(Some(message)) => self.emit(ChatEvent::MessageSent(message)).await,
            Ok(None) => {}
            Err(err) => self.emit(ChatEvent::SendFailed(err.to_string())).await,
        }
    }

    async fn switch_thread(&mut self, active: Option<ActiveThreadContext>) {
        self.subscription = None;
        self.state.close_thread();
        self.active = active;

        let Some(thread_id) = self.active.as_ref().map(|active| active.thread_id.clone()) else {
            return;
        };

        match ThreadSubscription::open(self.store.as_ref(), thread_id.clone()) {
            Ok(subscription) => {
                let thread = subscription.current().clone();
                self.subscription = Some(subscription);
                self.state.replace_thread(thread_id.clone(), thread.clone());
                self.emit(ChatEvent::ThreadUpdated(thread_id, thread)).await;
            }
            Err(err) => {
                log::error!("Failed to subscribe to thread {thread_id}: {err}");
                self.notify(format!("Could not open chat: {err}")).await;
            }
        }
    }

    async fn handle_thread_update(&mut self, update: Option<(ThreadId, Thread)>) {
        match update {
            Some((thread_id, thread)) => {
                self.state.replace_thread(thread_id.clone(), thread.clone());
                self.emit(ChatEvent::ThreadUpdated(thread_id, thread)).await;
            }
            None => {
                log::warn!("Thread subscription closed by the store");
                self.subscription = None;
            }
        }
    }

    async fn notify(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.state.push_notice(message.clone());
        self.emit(ChatEvent::Notice(message)).await;
    }

    async fn emit(&mut self, event: ChatEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::warn!("Failed to deliver event to the front end: {err}");
        }
    }
}

async fn next_thread_update(
    subscription: &mut Option<ThreadSubscription>,
) -> Option<(ThreadId, Thread)> {
    match subscription {
        Some(subscription) => {
            let thread = subscription.next().await?.clone();
            Some((subscription.thread_id().clone(), thread))
        }
        None => std::future::pending().await,
    }
}
