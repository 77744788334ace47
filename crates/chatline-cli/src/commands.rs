/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Users,
    Search(String),
    Conversations,
    Dm(String),
    Group { name: String, members: Vec<String> },
    Open(i64),
    /// Legacy broadcast to everyone.
    Say(String),
    /// Plain text for the open conversation.
    Send(String),
    Logout,
    Quit,
    Help,
    Invalid(&'static str),
}

pub const HELP: &str = "\
commands:
  /users                     list all users
  /search <query>            search users
  /convs                     list conversations
  /dm <user>                 start a private conversation
  /group <name> <u1,u2,...>  start a group conversation
  /open <id>                 open a conversation
  /say <text>                broadcast to everyone
  /logout                    forget the stored session and quit
  /quit                      quit
anything else is sent to the open conversation";

impl Command {
    /// `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Self::Send(line.to_string()));
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let command = match head {
            "/users" => Self::Users,
            "/search" => Self::Search(rest.to_string()),
            "/convs" => Self::Conversations,
            "/dm" if !rest.is_empty() => Self::Dm(rest.to_string()),
            "/dm" => Self::Invalid("usage: /dm <user>"),
            "/group" => match rest.split_once(char::is_whitespace) {
                Some((name, members)) => Self::Group {
                    name: name.to_string(),
                    members: members
                        .split(',')
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty())
                        .collect(),
                },
                None => Self::Invalid("usage: /group <name> <u1,u2,...>"),
            },
            "/open" => match rest.parse() {
                Ok(id) => Self::Open(id),
                Err(_) => Self::Invalid("usage: /open <id>"),
            },
            "/say" => Self::Say(rest.to_string()),
            "/logout" => Self::Logout,
            "/quit" | "/exit" => Self::Quit,
            "/help" => Self::Help,
            _ => Self::Invalid("unknown command, try /help"),
        };
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(Command::parse("  hello there "), Some(Command::Send("hello there".into())));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn group_members_are_comma_separated() {
        assert_eq!(
            Command::parse("/group team bob, carol,,dave"),
            Some(Command::Group {
                name: "team".into(),
                members: vec!["bob".into(), "carol".into(), "dave".into()],
            })
        );
        assert!(matches!(Command::parse("/group team"), Some(Command::Invalid(_))));
    }

    #[test]
    fn open_needs_a_number() {
        assert_eq!(Command::parse("/open 7"), Some(Command::Open(7)));
        assert!(matches!(Command::parse("/open seven"), Some(Command::Invalid(_))));
    }

    #[test]
    fn search_keeps_its_query_for_validation() {
        assert_eq!(Command::parse("/search a"), Some(Command::Search("a".into())));
        assert_eq!(Command::parse("/search"), Some(Command::Search(String::new())));
    }
}
