use chrono::{Duration, Utc};
use clap::Parser;
use fake::faker::internet::en::{SafeEmail, Username};
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use rand::Rng;

use udal::{
    auth::generate_validation_hash,
    config::Settings,
    domain::{ActiveState, NewMember, Realm, Sex},
    repository::{AuthRepository, MemberRepository},
    service::ServiceContext,
};

/// Fills a database with fake members.
#[derive(Parser, Debug)]
#[command(name = "seed")]
struct Args {
    /// Overrides the configured database url.
    #[arg(long)]
    database_url: Option<String>,

    /// Number of members to register.
    #[arg(long, default_value_t = 50)]
    count: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "udal=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });
    if let Some(url) = args.database_url {
        settings.database.url = url;
    }

    let services = ServiceContext::connect(&settings).await?;
    let mut rng = rand::thread_rng();
    let sexes = [Sex::Male, Sex::Female, Sex::Couple];
    let mut created = 0;

    for i in 0..args.count {
        let email: String = SafeEmail().fake();
        let username: String = Username().fake();
        let hash = generate_validation_hash();
        let age_days = rng.gen_range(18 * 365..70 * 365);

        let member = NewMember {
            email: format!("{}.{}", i, email),
            username: format!("{}{}", username, i),
            password: "password123".to_string(),
            first_name: Some(FirstName().fake()),
            last_name: Some(LastName().fake()),
            sex: sexes[rng.gen_range(0..sexes.len())],
            match_sex: vec![sexes[rng.gen_range(0..sexes.len())]],
            birth_date: Some((Utc::now() - Duration::days(age_days)).date_naive()),
            ip: format!("10.0.{}.{}", i / 256, i % 256),
            hash_validation: Some(hash.clone()),
            active: Some(ActiveState::Pending),
            country: Some(["FR", "US", "GB", "DE"][rng.gen_range(0..4)].to_string()),
            ..Default::default()
        };
        let email = member.email.clone();

        match services.member_repo.add(member).await {
            Ok(profile_id) => {
                created += 1;
                if i % 2 == 0 {
                    services.auth_repo.validate_account(&email, &hash, Realm::Members).await?;
                    tracing::debug!("Activated member {}", profile_id);
                }
            }
            Err(e) => tracing::warn!("Skipped fake member {}: {}", i, e),
        }
    }

    let total = services.member_repo.total(Realm::Members, 0, None).await?;
    tracing::info!("Seeded {} members ({} in total)", created, total);
    Ok(())
}
