//! 预生成值池
//!
//! 启动时一次性生成，运行期间只读；采样为有放回的均匀随机抽取。

use fake::Fake;
use fake::faker::address::en::CityName;
use fake::faker::internet::en::UserAgent;
use rand::Rng;
use rand::seq::SliceRandom;

use loadgen_shared::config::PoolSizes;

/// 交互事件可能访问的页面
pub const URLS: [&str; 10] = [
    "/home",
    "/search",
    "/product",
    "/cart",
    "/checkout",
    "/help",
    "/about",
    "/contact",
    "/api/v1/products",
    "/api/v1/users",
];

#[derive(Debug, Clone)]
pub struct ValuePools {
    pub user_ids: Vec<String>,
    pub device_ids: Vec<String>,
    pub user_agents: Vec<String>,
    pub cities: Vec<String>,
}

impl ValuePools {
    /// 按配置的大小生成各个值池
    ///
    /// 标识符从 1 开始编号并补零到 5 位（u00001、d00001）。
    /// 大小为 0 的池会被提升为 1，保证采样总能取到值。
    pub fn generate(sizes: &PoolSizes) -> Self {
        Self {
            user_ids: numbered_ids('u', sizes.user_ids),
            device_ids: numbered_ids('d', sizes.device_ids),
            user_agents: (0..sizes.user_agents.max(1))
                .map(|_| UserAgent().fake())
                .collect(),
            cities: (0..sizes.cities.max(1)).map(|_| CityName().fake()).collect(),
        }
    }

    pub fn user_id<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick(&self.user_ids, rng)
    }

    pub fn device_id<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick(&self.device_ids, rng)
    }

    pub fn user_agent<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick(&self.user_agents, rng)
    }

    pub fn city<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick(&self.cities, rng)
    }

    pub fn url<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
        URLS.choose(rng).copied().unwrap_or(URLS[0])
    }
}

fn numbered_ids(prefix: char, count: usize) -> Vec<String> {
    (1..=count.max(1)).map(|i| format!("{prefix}{i:05}")).collect()
}

fn pick<'a, R: Rng + ?Sized>(pool: &'a [String], rng: &mut R) -> &'a str {
    pool.choose(rng).map(String::as_str).unwrap_or_default()
}
