use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lazy_static::lazy_static;
use shardmemodb::{
    DataType, DbError, Entity, EntityDescriptor, InMemoryEngine, Member, ModShardingStrategy,
    Row, RoutingResolver, ShardingConfig, ShardingDbContext, ShardingOptions,
    ShardingRegistry, Value, col,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shardmemodb")]
#[command(about = "Sharded query federation over an in-memory engine")]
struct Cli {
    /// Number of physical Order tables
    #[arg(long, default_value_t = 4)]
    tables: u32,
    /// Data sources the tables are spread over
    #[arg(long, default_value_t = 2)]
    data_sources: u32,
    /// ShardingOptions as JSON
    #[arg(long)]
    options: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed orders and print a page, ordered by amount descending
    Demo {
        #[arg(long, default_value_t = 40)]
        orders: i64,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = 10)]
        page_size: u64,
    },
    /// Print the physical table for a customer id
    Route {
        #[arg(long)]
        customer_id: i64,
    },
}

#[derive(Debug, Clone)]
struct Order {
    id: i64,
    customer_id: i64,
    amount: i64,
}

lazy_static! {
    static ref ORDER: EntityDescriptor = EntityDescriptor::new(
        "Order",
        vec![
            Member::new("id", DataType::Integer).not_null(),
            Member::new("customer_id", DataType::Integer).not_null(),
            Member::new("amount", DataType::Integer).not_null(),
        ],
        "id",
    );
}

impl Entity for Order {
    fn descriptor() -> &'static EntityDescriptor {
        &ORDER
    }

    fn to_row(&self) -> Row {
        vec![
            Value::Integer(self.id),
            Value::Integer(self.customer_id),
            Value::Integer(self.amount),
        ]
    }

    fn from_row(row: &Row) -> shardmemodb::Result<Self> {
        let int = |index: usize| {
            row.get(index).and_then(Value::as_i64).ok_or_else(|| {
                DbError::TypeMismatch(format!("Order member #{} is not an integer", index))
            })
        };
        Ok(Order {
            id: int(0)?,
            customer_id: int(1)?,
            amount: int(2)?,
        })
    }
}

fn registry(tables: u32, data_sources: u32) -> Result<ShardingRegistry> {
    let sources: Vec<String> = (0..data_sources.max(1)).map(|i| format!("ds{}", i)).collect();
    let strategy = ModShardingStrategy::new("Order", tables)?.with_data_sources(sources)?;
    let registry = ShardingRegistry::new()
        .with::<Order>(ShardingConfig::for_entity::<Order>("customer_id", strategy))?;
    Ok(registry)
}

fn load_options(path: Option<&PathBuf>) -> Result<ShardingOptions> {
    match path {
        None => Ok(ShardingOptions::new()),
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(ShardingOptions::from_json(&json)?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let registry = registry(cli.tables, cli.data_sources)?;
    let options = load_options(cli.options.as_ref())?;

    match cli.command {
        Command::Route { customer_id } => {
            let entity = registry.get("Order")?;
            let table = RoutingResolver::new(&entity.config, &entity.descriptor)
                .resolve(&Value::Integer(customer_id))?;
            println!("customer {} -> {}", customer_id, table);
        }
        Command::Demo {
            orders,
            page,
            page_size,
        } => {
            let context = ShardingDbContext::new(InMemoryEngine::new(), registry, options)?;
            let seeded: Vec<Order> = (1..=orders)
                .map(|id| Order {
                    id,
                    customer_id: id % 7,
                    amount: (id * 37) % 101,
                })
                .collect();
            let inserted = context.insert_range(&seeded).await?;
            println!("inserted {} orders across {} tables", inserted, cli.tables);

            let listing = context
                .query::<Order>()
                .filter(col("amount").gt(10))
                .order_by_desc("amount")
                .paging(page, page_size)
                .await?;
            println!(
                "page {}/{} ({} matching orders)",
                listing.page_number,
                listing.page_count(),
                listing.total_count
            );
            for order in &listing.items {
                println!(
                    "  #{:<4} customer {:<3} amount {}",
                    order.id, order.customer_id, order.amount
                );
            }

            let all = context.query::<Order>();
            println!("sum(amount) = {}", all.sum("amount").await?);
            println!("avg(amount) = {}", all.average("amount").await?);
            println!("min(amount) = {}", all.min("amount").await?);
            println!("max(amount) = {}", all.max("amount").await?);

            for stats in context.pool_stats()? {
                println!("{}", stats);
            }
        }
    }
    Ok(())
}
