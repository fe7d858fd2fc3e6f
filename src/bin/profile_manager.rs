use clap::{App, Arg, SubCommand};
use word_duel::profile::{ProfileStore, UserProfile};

#[tokio::main]
async fn main() {
    let matches = App::new("存档管理器")
        .version("1.0")
        .about("管理用户存档")
        .subcommand(SubCommand::with_name("list").about("列出所有用户"))
        .subcommand(
            SubCommand::with_name("show")
                .about("显示用户存档")
                .arg(Arg::with_name("username").help("用户名").required(true).index(1)),
        )
        .subcommand(
            SubCommand::with_name("create")
                .about("创建新用户")
                .arg(Arg::with_name("username").help("用户名").required(true).index(1))
                .arg(
                    Arg::with_name("password")
                        .help("密码（4位数字）")
                        .required(true)
                        .index(2),
                ),
        )
        .subcommand(SubCommand::with_name("stats").about("显示存档统计信息"))
        .get_matches();

    // 初始化配置
    if let Err(e) = word_duel::config::Config::init() {
        eprintln!("配置初始化失败: {}", e);
        return;
    }

    let config = word_duel::config::Config::get();
    let store = match ProfileStore::new(&config.storage.user_data_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("打开存档目录失败: {}", e);
            return;
        }
    };

    match matches.subcommand() {
        Some(("list", _)) => match store.list().await {
            Ok(usernames) => {
                println!("用户列表:");
                for username in usernames {
                    println!("  {}", username);
                }
            }
            Err(e) => eprintln!("列出用户失败: {}", e),
        },
        Some(("show", args)) => {
            let username = args.value_of("username").unwrap();
            match store.load(username).await {
                Ok(Some(profile)) => {
                    println!("用户: {}", profile.username);
                    println!("  总分: {}", profile.score);
                    println!("  金币: {:.1}", profile.money_earned);
                    println!("  创建于: {}", profile.created_at);
                }
                Ok(None) => println!("用户 {} 不存在", username),
                Err(e) => eprintln!("读取存档失败: {}", e),
            }
        }
        Some(("create", args)) => {
            let username = args.value_of("username").unwrap();
            let password = args.value_of("password").unwrap();

            if password.len() != 4 || !password.chars().all(|c| c.is_ascii_digit()) {
                eprintln!("密码必须是4位数字");
                return;
            }

            match store.load(username).await {
                Ok(Some(_)) => eprintln!("用户名 {} 已存在", username),
                Ok(None) => {
                    let profile = UserProfile::new(username, password);
                    if let Err(e) = store.save(&profile).await {
                        eprintln!("创建用户失败: {}", e);
                    } else {
                        println!("成功创建用户: {}", username);
                    }
                }
                Err(e) => eprintln!("读取存档失败: {}", e),
            }
        }
        Some(("stats", _)) => {
            let usernames = match store.list().await {
                Ok(usernames) => usernames,
                Err(e) => {
                    eprintln!("列出用户失败: {}", e);
                    return;
                }
            };

            let mut total_score: u64 = 0;
            let mut total_money: f64 = 0.0;
            for username in &usernames {
                if let Ok(Some(profile)) = store.load(username).await {
                    total_score += profile.score;
                    total_money += profile.money_earned;
                }
            }

            println!("存档统计信息:");
            println!("  用户总数: {}", usernames.len());
            println!("  总分: {}", total_score);
            println!("  总金币: {:.1}", total_money);
        }
        _ => {
            println!("请使用 --help 查看可用命令");
        }
    }
}
