use std::path::PathBuf;

use crate::common::ChatCommand;

/// What a line typed into the terminal asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    Commands(Vec<ChatCommand>),
    /// The image still has to be read from disk before it can be attached.
    AttachImage(PathBuf),
    Quit,
    Help,
    Unknown(String),
}

pub const HELP: &str = "\
Type a message and press Enter to send it.
  /img PATH     attach an image (sent with the next message)
  /noimg        drop the attached image
  /emoji E      append an emoji to the draft
  /send         send the draft as it is
  /rec          start recording, or stop and send the recording
  /online, /offline
  /quit";

pub fn parse_line(line: &str) -> InputAction {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix('/') else {
        return InputAction::Commands(vec![
            ChatCommand::SetText(line.to_string()),
            ChatCommand::Send,
        ]);
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };

    match (name, argument) {
        ("quit" | "exit", _) => InputAction::Quit,
        ("help", _) => InputAction::Help,
        ("img", path) if !path.is_empty() => InputAction::AttachImage(PathBuf::from(path)),
        ("noimg", _) => InputAction::Commands(vec![ChatCommand::DetachImage]),
        ("emoji", emoji) if !emoji.is_empty() => {
            InputAction::Commands(vec![ChatCommand::PushEmoji(emoji.to_string())])
        }
        ("send", _) => InputAction::Commands(vec![ChatCommand::Send]),
        ("rec", _) => InputAction::Commands(vec![ChatCommand::ToggleRecording]),
        ("online", _) => InputAction::Commands(vec![ChatCommand::SetPresence(true)]),
        ("offline", _) => InputAction::Commands(vec![ChatCommand::SetPresence(false)]),
        _ => InputAction::Unknown(line.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(action: InputAction) -> Vec<ChatCommand> {
        match action {
            InputAction::Commands(commands) => commands,
            other => panic!("expected commands, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_sets_and_sends() {
        let commands = commands(parse_line("hello there\n"));
        assert!(matches!(&commands[0], ChatCommand::SetText(text) if text == "hello there"));
        assert!(matches!(commands[1], ChatCommand::Send));
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_line("/quit"), InputAction::Quit);
        assert_eq!(
            parse_line("/img  ./cat.png "),
            InputAction::AttachImage(PathBuf::from("./cat.png"))
        );
        assert!(matches!(
            commands(parse_line("/rec")).as_slice(),
            [ChatCommand::ToggleRecording]
        ));
        assert!(matches!(
            commands(parse_line("/emoji 😉")).as_slice(),
            [ChatCommand::PushEmoji(emoji)] if emoji == "😉"
        ));
        assert_eq!(parse_line("/img"), InputAction::Unknown("/img".to_string()));
    }
}
