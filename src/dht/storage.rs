use crate::codec::Payload;
use crate::dht::NodeId;
use log::{debug, trace};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// 存储条目的默认生存时间：一周
pub const DEFAULT_STORAGE_TTL: Duration = Duration::from_secs(604_800);

/// 可以为"假"的值
///
/// 为键设置假值会删除该键，而不是存储它。
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl<T: Truthy> Truthy for Option<T> {
    fn is_truthy(&self) -> bool {
        self.as_ref().map_or(false, Truthy::is_truthy)
    }
}

impl Truthy for Vec<u8> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for &str {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for i64 {
    fn is_truthy(&self) -> bool {
        *self != 0
    }
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

/// DHT引擎使用的存储后端接口
pub trait DhtStorage: Send {
    /// 存储值，假值会删除该键
    fn set(&mut self, key: NodeId, value: Payload);

    /// 返回键的有效值
    fn get(&mut self, key: &NodeId) -> Option<Payload>;

    /// 检查是否存在有效值
    fn contains(&mut self, key: &NodeId) -> bool;

    /// 所有有效条目，从旧到新
    fn entries(&mut self) -> Vec<(NodeId, Payload)>;

    /// 至少 `age` 时间未刷新的有效条目，从旧到新
    fn entries_older_than(&mut self, age: Duration) -> Vec<(NodeId, Payload)>;

    /// 有效条目数量
    fn len(&mut self) -> usize;

    /// 有效条目的调试表示
    fn describe(&mut self) -> String;
}

#[derive(Clone)]
struct StorageEntry<K, V> {
    key: K,
    timestamp: Instant,
    value: V,
}

/// 带惰性过期淘汰的内存键值存储
///
/// 条目按插入顺序保存。每次更新都先删除旧条目再追加新条目，
/// 因此插入顺序也就是新旧顺序。淘汰只在访问时进行：
/// 每次读、写和遍历前，先从头部清理过期条目，
/// 遇到第一个未过期的条目即停止。
///
/// 非线程安全，由调用方保证互斥。
pub struct TtlStorage<K, V> {
    /// 按插入序号索引的条目
    entries: BTreeMap<u64, StorageEntry<K, V>>,

    /// 键到序号的映射
    index: HashMap<K, u64>,

    /// 下一个序号
    next_seq: u64,

    /// 条目最大存活时间
    ttl: Duration,
}

impl<K, V> TtlStorage<K, V>
where
    K: Hash + Eq + Clone,
    V: Truthy,
{
    /// 创建空存储。ttl为零时每次访问都会清空所有条目。
    pub fn new(ttl: Duration) -> Self {
        debug!("TtlStorage init (ttl = {:?})", ttl);

        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 在 `key` 下存储 `value`，并重置该键的新旧位置。
    ///
    /// 假值会删除该键且不存储任何内容。
    pub fn set(&mut self, key: K, value: V) {
        self.remove_entry(&key);

        if value.is_truthy() {
            let seq = self.next_seq;
            self.next_seq += 1;

            self.index.insert(key.clone(), seq);
            self.entries.insert(
                seq,
                StorageEntry {
                    key,
                    timestamp: Instant::now(),
                    value,
                },
            );
        }

        self.cull();
    }

    /// 返回 `key` 的有效值
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.cull();

        let seq = self.index.get(key)?;
        self.entries.get(seq).map(|entry| &entry.value)
    }

    /// 返回 `key` 的有效值，不存在时返回 `default`
    pub fn get_or(&mut self, key: &K, default: V) -> V
    where
        V: Clone,
    {
        self.get(key).cloned().unwrap_or(default)
    }

    /// 检查 `key` 是否有有效值
    pub fn contains(&mut self, key: &K) -> bool {
        self.cull();
        self.index.contains_key(key)
    }

    /// 删除 `key`，仍有效时返回其值
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.cull();
        self.remove_entry(key).map(|entry| entry.value)
    }

    /// 按插入顺序遍历有效条目。
    ///
    /// 先执行清理，迭代器不会产生过期条目。
    pub fn iter(&mut self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.cull();
        self.entries.values().map(|entry| (&entry.key, &entry.value))
    }

    /// 头部存活时间至少为 `age` 的条目
    pub fn iter_older_than(&mut self, age: Duration) -> Vec<(K, V)>
    where
        V: Clone,
    {
        self.cull();

        let now = Instant::now();
        self.entries
            .values()
            .take_while(|entry| now.duration_since(entry.timestamp) >= age)
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect()
    }

    /// 有效条目数量
    pub fn len(&mut self) -> usize {
        self.cull();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// 从头部淘汰过期条目。
    ///
    /// 依赖插入顺序即新旧顺序：遇到第一个比截止时间新的条目就结束。
    /// 返回淘汰的条目数。
    pub fn cull(&mut self) -> usize {
        let now = Instant::now();
        let cutoff = match now.checked_sub(self.ttl) {
            Some(cutoff) => cutoff,
            // ttl超出时钟起点，不可能有这么旧的条目
            None => return 0,
        };

        let mut evicted = 0;
        while let Some(entry) = self.entries.first_entry() {
            if entry.get().timestamp > cutoff {
                break;
            }

            let entry = entry.remove();
            self.index.remove(&entry.key);
            evicted += 1;
        }

        if evicted > 0 {
            trace!("Culled {} expired entries", evicted);
        }

        evicted
    }

    /// 清理后返回调试表示
    pub fn describe(&mut self) -> String
    where
        K: fmt::Debug,
        V: fmt::Debug,
    {
        self.cull();
        format!("{:?}", self)
    }

    fn remove_entry(&mut self, key: &K) -> Option<StorageEntry<K, V>> {
        let seq = self.index.remove(key)?;
        self.entries.remove(&seq)
    }
}

impl<K, V> Default for TtlStorage<K, V>
where
    K: Hash + Eq + Clone,
    V: Truthy,
{
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_TTL)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for TtlStorage<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.values().map(|entry| (&entry.key, &entry.value)))
            .finish()
    }
}

impl<K, V> Drop for TtlStorage<K, V> {
    fn drop(&mut self) {
        debug!("TtlStorage destroy ({} entries)", self.entries.len());
    }
}

impl DhtStorage for TtlStorage<NodeId, Payload> {
    fn set(&mut self, key: NodeId, value: Payload) {
        TtlStorage::set(self, key, value)
    }

    fn get(&mut self, key: &NodeId) -> Option<Payload> {
        TtlStorage::get(self, key).cloned()
    }

    fn contains(&mut self, key: &NodeId) -> bool {
        TtlStorage::contains(self, key)
    }

    fn entries(&mut self) -> Vec<(NodeId, Payload)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn entries_older_than(&mut self, age: Duration) -> Vec<(NodeId, Payload)> {
        self.iter_older_than(age)
    }

    fn len(&mut self) -> usize {
        TtlStorage::len(self)
    }

    fn describe(&mut self) -> String {
        TtlStorage::describe(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_set_and_get() {
        let mut storage: TtlStorage<&str, String> = TtlStorage::new(Duration::from_secs(60));

        storage.set("a", "1".to_string());
        storage.set("b", "2".to_string());

        assert_eq!(storage.get(&"a"), Some(&"1".to_string()));
        assert!(storage.contains(&"b"));
        assert_eq!(storage.get_or(&"missing", "default".to_string()), "default");
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_update_moves_key_to_tail() {
        let mut storage: TtlStorage<&str, i64> = TtlStorage::new(Duration::from_secs(60));

        storage.set("a", 1);
        storage.set("b", 2);
        storage.set("a", 3);

        let order: Vec<_> = storage.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(order, vec![("b", 2), ("a", 3)]);
    }

    #[test]
    fn test_falsy_set_deletes() {
        let mut storage: TtlStorage<&str, Option<String>> = TtlStorage::new(Duration::from_secs(60));

        storage.set("a", Some("x".to_string()));
        storage.set("a", None);
        assert!(!storage.contains(&"a"));

        // 未知键的假值同样不会存储
        storage.set("b", Some(String::new()));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_storage() {
        let mut storage: TtlStorage<&str, i64> = TtlStorage::new(Duration::ZERO);

        storage.set("a", 1);
        assert_eq!(storage.get(&"a"), None);
        assert_eq!(storage.iter().count(), 0);
    }

    #[test]
    fn test_cull_stops_at_first_live_entry() {
        let mut storage: TtlStorage<&str, i64> = TtlStorage::new(Duration::from_millis(200));

        storage.set("old", 1);
        sleep(Duration::from_millis(250));
        storage.set("new", 2);

        assert_eq!(storage.get(&"old"), None);
        assert_eq!(storage.get(&"new"), Some(&2));
        assert_eq!(storage.cull(), 0);
    }

    #[test]
    fn test_iter_older_than() {
        let mut storage: TtlStorage<&str, i64> = TtlStorage::new(Duration::from_secs(60));

        storage.set("a", 1);
        storage.set("b", 2);
        sleep(Duration::from_millis(100));
        storage.set("c", 3);

        let old = storage.iter_older_than(Duration::from_millis(80));
        assert_eq!(old, vec![("a", 1), ("b", 2)]);
        assert!(storage.iter_older_than(Duration::from_secs(30)).is_empty());
    }

    #[test]
    fn test_describe_shows_live_entries() {
        let mut storage: TtlStorage<&str, i64> = TtlStorage::new(Duration::from_secs(60));
        storage.set("a", 1);
        assert_eq!(storage.describe(), "{\"a\": 1}");
    }
}
