//! Interactive stdin commands.

/// One parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum UserCommand {
    Help,
    Pause,
    Resume,
    Stop,
    Jump(u32),
    Time,
    Volume,
    Quit,
}

pub const HELP: &str = "\
h        Show help.
p        Pause playback.
r        Resume/start playback.
s        Stop playback.
j T      Jump to T milliseconds.
t        Show current time.
v, ?     Volume control (not supported).
q        Quit.";

/// Parse a command line. Returns a message for unrecognized input.
pub fn parse_line(line: &str) -> Result<UserCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Err("Empty command. Type 'h' for help.".to_string());
    };
    match head {
        "h" => Ok(UserCommand::Help),
        "p" => Ok(UserCommand::Pause),
        "r" => Ok(UserCommand::Resume),
        "s" => Ok(UserCommand::Stop),
        "t" => Ok(UserCommand::Time),
        "q" => Ok(UserCommand::Quit),
        "v" | "?" => Ok(UserCommand::Volume),
        "j" => parts
            .next()
            .and_then(|ms| ms.parse().ok())
            .map(UserCommand::Jump)
            .ok_or_else(|| "Could not read time. Usage: j <milliseconds>".to_string()),
        other => Err(format!("Unrecognized command '{other}'. Type 'h' for help.")),
    }
}
