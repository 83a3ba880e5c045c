use std::io::{self, BufRead, Write};

/// What the chat core needs from whatever is drawing the conversation.
///
/// Implementations are called from the client's receive task, so they must
/// be cheap and must not block for long. `get_user_name` is the exception:
/// it runs on a blocking thread during the handshake.
pub trait ChatUi: Send + Sync + 'static {
    fn get_user_name(&self) -> String;
    fn add_message(&self, text: &str);
    fn set_online_users(&self, names: &[String]);
}

/// Plain terminal front end: prompts on stdout, reads stdin.
#[derive(Debug, Default)]
pub struct ConsoleUi;

impl ChatUi for ConsoleUi {
    fn get_user_name(&self) -> String {
        print!("Name: ");
        let _ = io::stdout().flush();

        let mut name = String::new();
        // An unreadable stdin yields an empty name, which the server rejects.
        let _ = io::stdin().lock().read_line(&mut name);
        name.trim().to_string()
    }

    fn add_message(&self, text: &str) {
        println!("{text}");
    }

    fn set_online_users(&self, names: &[String]) {
        println!("* online: {}", names.join(", "));
    }
}
