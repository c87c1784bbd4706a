use clap::{Parser, Subcommand, ValueEnum};

use auth_server::auth::{Credential, Privilege, SignUpInput};
use auth_server::protocol::{Response, Status};
use auth_server::AuthClient;

#[derive(Parser)]
#[command(name = "auth-cli")]
#[command(about = "One-shot client for the auth server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        street: String,
        #[arg(long, default_value = "")]
        zip: String,
        #[arg(long, default_value = "")]
        city: String,
        #[arg(long, value_enum, default_value_t = Role::User)]
        role: Role,
    },
    /// Check a credential
    Signin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    User,
    Admin,
}

impl From<Role> for Privilege {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Privilege::User,
            Role::Admin => Privilege::Admin,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = AuthClient::new(cli.addr);

    let response = match cli.command {
        Commands::Signup {
            email,
            password,
            name,
            street,
            zip,
            city,
            role,
        } => {
            let input = SignUpInput {
                credential: Credential {
                    identifier: email,
                    secret: password,
                },
                name,
                street,
                zip,
                city,
                privilege: role.into(),
            };
            client.sign_up(&input).await?
        }
        Commands::Signin { email, password } => {
            let credential = Credential {
                identifier: email,
                secret: password,
            };
            client.sign_in(&credential).await?
        }
    };

    print_response(&response)
}

fn print_response(response: &Response) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if response.status != Status::Ok {
        std::process::exit(1);
    }
    Ok(())
}
