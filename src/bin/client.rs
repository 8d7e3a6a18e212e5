use clap::{Parser, Subcommand};
use identity_gateway::proto::identity_service_client::IdentityServiceClient;
use identity_gateway::proto::{
    CurrentUserRequest, HealthCheckRequest, LoginRequest, RegisterRequest,
};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::Request;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Identity gateway gRPC client", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATEWAY_URL", default_value = "http://127.0.0.1:9090")]
    server: String,

    /// Bearer token for protected calls
    #[arg(short, long, env = "GATEWAY_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check liveness
    Health,

    /// Log in with a username or email
    Login {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        password: String,
    },

    /// Show the identity carried by the token
    Whoami,

    /// Register a new user (needs --token)
    Register {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },
}

fn authorized<T>(message: T, token: Option<&str>) -> Result<Request<T>, Box<dyn std::error::Error>> {
    let mut request = Request::new(message);
    let token = token.ok_or("this command needs --token or GATEWAY_TOKEN")?;
    let value: MetadataValue<Ascii> = format!("Bearer {token}").parse()?;
    request.metadata_mut().insert("authorization", value);
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut client = IdentityServiceClient::connect(cli.server.clone()).await?;
    let token = cli.token.as_deref();

    match cli.command {
        Commands::Health => {
            let response = client
                .health_check(Request::new(HealthCheckRequest {}))
                .await?
                .into_inner();
            println!("{}", response.status);
        }

        Commands::Login { user, password } => {
            let response = client
                .login(Request::new(LoginRequest {
                    username: user,
                    password,
                }))
                .await?
                .into_inner();
            println!("{}", response.token);
        }

        Commands::Whoami => {
            let response = client
                .current_user(authorized(CurrentUserRequest {}, token)?)
                .await?
                .into_inner();
            println!("user_id:    {}", response.user_id);
            println!("username:   {}", response.username);
            println!("issued_at:  {}", response.issued_at);
            println!("expires_at: {}", response.expires_at);
        }

        Commands::Register {
            user,
            email,
            password,
        } => {
            let request = authorized(
                RegisterRequest {
                    username: user,
                    email,
                    password,
                },
                token,
            )?;
            let response = client.register(request).await?.into_inner();
            println!("Registered {}", response.user_id);
            println!("{}", response.token);
        }
    }

    Ok(())
}
