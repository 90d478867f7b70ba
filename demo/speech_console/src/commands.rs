use cadence_core::SpeechOptions;

/// One line of console input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Say(String),
    SayWith(SpeechOptions, String),
    Pause,
    Resume,
    Stop,
    Config(SpeechOptions),
    Reset,
    Voices(Option<String>),
    Engines,
    Engine(String),
    Speaking,
    Install,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  say <text>                  queue text with the global options
  sayw <json-options> <text>  queue text with overrides, e.g. sayw {\"rate\":1.5} hello
  pause | resume | stop
  config <json-options>       merge into the global options
  reset                       restore default options
  voices [language]           list voices, optionally filtered by locale prefix
  engines | engine <name>     list engines / switch engine
  speaking | install | status | quit";

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    match verb.to_lowercase().as_str() {
        "say" => Ok(Command::Say(rest.to_string())),
        "sayw" => {
            let (options, text) = split_json(rest)?;
            Ok(Command::SayWith(options, text.to_string()))
        }
        "pause" => Ok(Command::Pause),
        "resume" => Ok(Command::Resume),
        "stop" => Ok(Command::Stop),
        "config" => {
            let (options, trailing) = split_json(rest)?;
            if !trailing.is_empty() {
                return Err(format!("unexpected text after options: {}", trailing));
            }
            Ok(Command::Config(options))
        }
        "reset" => Ok(Command::Reset),
        "voices" => Ok(Command::Voices(
            Some(rest.to_string()).filter(|s| !s.is_empty()),
        )),
        "engines" => Ok(Command::Engines),
        "engine" if !rest.is_empty() => Ok(Command::Engine(rest.to_string())),
        "engine" => Err("usage: engine <name>".to_string()),
        "speaking" => Ok(Command::Speaking),
        "install" => Ok(Command::Install),
        "status" => Ok(Command::Status),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command '{}' (try help)", other)),
    }
}

/// Split a leading JSON object off `input`, returning it and the remaining text.
fn split_json(input: &str) -> Result<(SpeechOptions, &str), String> {
    let mut stream = serde_json::Deserializer::from_str(input).into_iter::<SpeechOptions>();
    match stream.next() {
        Some(Ok(options)) => {
            let rest = input[stream.byte_offset()..].trim();
            Ok((options, rest))
        }
        Some(Err(e)) => Err(format!("invalid options: {}", e)),
        None => Err("expected a JSON options object".to_string()),
    }
}
