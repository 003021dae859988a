use crate::core::{AudioQueueConfig, MediaPacket, OverflowPolicy};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 队列容量上限
///
/// 两个上限都为 None 时退化为无界队列。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapacity {
    pub max_packets: Option<usize>,
    pub max_bytes: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl QueueCapacity {
    pub fn unbounded() -> Self {
        Self {
            max_packets: None,
            max_bytes: None,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl From<&AudioQueueConfig> for QueueCapacity {
    fn from(config: &AudioQueueConfig) -> Self {
        Self {
            max_packets: config.max_packets,
            max_bytes: config.max_bytes,
            overflow: config.overflow,
        }
    }
}

/// push 失败，被拒绝的包原样交还
#[derive(Error, Debug)]
pub enum PushError {
    #[error("数据包队列已满")]
    Full(MediaPacket),

    #[error("数据包队列已关闭")]
    ShutDown(MediaPacket),

    #[error("数据包队列无法分配空间")]
    Allocation(MediaPacket),
}

impl PushError {
    pub fn into_packet(self) -> MediaPacket {
        match self {
            PushError::Full(p) | PushError::ShutDown(p) | PushError::Allocation(p) => p,
        }
    }
}

/// pop 的结果
#[derive(Debug)]
pub enum PopResult {
    Packet(MediaPacket),
    /// 队列为空（非阻塞调用，或等待超时）
    Empty,
    ShutDown,
}

/// 队列当前状态快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub packets: usize,
    pub bytes: usize,
}

struct QueueState {
    packets: VecDeque<MediaPacket>,
    size: usize,
    shut_down: bool,
    /// 消费者取走的数据还没有全部输出
    in_flight: bool,
}

impl QueueState {
    fn take_front(&mut self) -> Option<MediaPacket> {
        let packet = self.packets.pop_front()?;
        self.size -= packet.size();
        self.in_flight = true;
        Some(packet)
    }

    fn is_drained(&self) -> bool {
        self.shut_down || (self.packets.is_empty() && !self.in_flight)
    }
}

/// 线程安全的 FIFO 数据包队列
///
/// - 包数量就是内部 `VecDeque` 的长度，字节数在同一把锁下维护
/// - `pop(true)` 在空队列上等待 `not_empty`，醒来后先检查关闭标志再检查是否为空
/// - 设置了上限时 `push` 按 `OverflowPolicy` 阻塞或拒绝
/// - 消费者输出完取走的数据后调用 `mark_played()`，`wait_until_drained` 等的是
///   「队列为空且消费者手上没有数据」，在独立的 `drained` 上等待
/// - `shutdown()` 丢弃所有排队的包并唤醒所有等待者（消费者、生产者和 drain 等待者）
pub struct PacketQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
    capacity: QueueCapacity,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::with_capacity(QueueCapacity::unbounded())
    }

    pub fn with_capacity(capacity: QueueCapacity) -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                size: 0,
                shut_down: false,
                in_flight: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            drained: Condvar::new(),
            capacity,
        }
    }

    /// 入队到队尾
    pub fn push(&self, packet: MediaPacket) -> Result<(), PushError> {
        let mut state = self.state.lock();

        loop {
            if state.shut_down {
                return Err(PushError::ShutDown(packet));
            }
            if !self.is_full(&state, packet.size()) {
                break;
            }
            match self.capacity.overflow {
                OverflowPolicy::Reject => return Err(PushError::Full(packet)),
                OverflowPolicy::Block => self.not_full.wait(&mut state),
            }
        }

        if state.packets.try_reserve(1).is_err() {
            return Err(PushError::Allocation(packet));
        }

        state.size += packet.size();
        state.packets.push_back(packet);
        self.not_empty.notify_one();
        Ok(())
    }

    /// 从队头取包
    ///
    /// `blocking` 为 false 时空队列立即返回 `Empty`；
    /// 为 true 时一直等到有包或队列被关闭。
    pub fn pop(&self, blocking: bool) -> PopResult {
        let mut state = self.state.lock();

        loop {
            if state.shut_down {
                return PopResult::ShutDown;
            }
            if let Some(packet) = state.take_front() {
                self.not_full.notify_one();
                return PopResult::Packet(packet);
            }
            if !blocking {
                return PopResult::Empty;
            }
            // 可能是虚假唤醒或被别的消费者抢先，回到循环顶部重新检查
            self.not_empty.wait(&mut state);
        }
    }

    /// 阻塞取包，最多等待 `timeout`，超时返回 `Empty`
    pub fn pop_timeout(&self, timeout: Duration) -> PopResult {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if state.shut_down {
                return PopResult::ShutDown;
            }
            if let Some(packet) = state.take_front() {
                self.not_full.notify_one();
                return PopResult::Packet(packet);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                // 超时的同时可能刚好有包到达或队列被关闭
                if state.shut_down {
                    return PopResult::ShutDown;
                }
                return match state.take_front() {
                    Some(packet) => {
                        self.not_full.notify_one();
                        PopResult::Packet(packet)
                    }
                    None => PopResult::Empty,
                };
            }
        }
    }

    /// 关闭队列：置位关闭标志，释放所有排队的包，唤醒所有等待者
    ///
    /// 重复调用与调用一次效果相同。
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.packets.clear();
        state.size = 0;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.drained.notify_all();
    }

    /// 消费者已经输出完之前取走的所有数据
    pub fn mark_played(&self) {
        let mut state = self.state.lock();
        if state.in_flight {
            state.in_flight = false;
            if state.is_drained() {
                self.drained.notify_all();
            }
        }
    }

    /// 等待排队的数据全部播放完（或队列被关闭），最多等待 `timeout`
    ///
    /// 返回 true 表示队列为空且消费者已调用 `mark_played()`，或队列已关闭。
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while !state.is_drained() {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.is_drained()
    }

    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().packets.is_empty()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            packets: state.packets.len(),
            bytes: state.size,
        }
    }

    fn is_full(&self, state: &QueueState, incoming: usize) -> bool {
        // 队列为空时总是接收，否则一个超过字节上限的包会让生产者永远等待
        if state.packets.is_empty() {
            return false;
        }
        let over_count = self
            .capacity
            .max_packets
            .map_or(false, |max| state.packets.len() >= max);
        let over_bytes = self
            .capacity
            .max_bytes
            .map_or(false, |max| state.size + incoming > max);
        over_count || over_bytes
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn packet(tag: u8, len: usize) -> MediaPacket {
        MediaPacket::new(1, vec![tag; len])
    }

    fn expect_packet(result: PopResult) -> MediaPacket {
        match result {
            PopResult::Packet(p) => p,
            other => panic!("expected a packet, got {:?}", other),
        }
    }

    #[test]
    fn fifo_order_and_accounting() {
        let queue = PacketQueue::new();
        let sizes = [100usize, 250, 10, 0, 7];

        for (i, len) in sizes.iter().enumerate() {
            queue.push(packet(i as u8, *len)).unwrap();
            assert_eq!(queue.len(), i + 1);
            assert_eq!(queue.size(), sizes[..=i].iter().sum::<usize>());
        }

        for (i, len) in sizes.iter().enumerate() {
            let p = expect_packet(queue.pop(false));
            assert_eq!(p.size(), *len);
            if *len > 0 {
                assert_eq!(p.data[0], i as u8);
            }
            assert_eq!(queue.len(), sizes.len() - i - 1);
            assert_eq!(queue.size(), sizes[i + 1..].iter().sum::<usize>());
        }

        assert!(matches!(queue.pop(false), PopResult::Empty));
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn interleaved_push_pop_keeps_order() {
        let queue = PacketQueue::new();
        queue.push(packet(1, 1)).unwrap();
        queue.push(packet(2, 2)).unwrap();
        assert_eq!(expect_packet(queue.pop(false)).data[0], 1);
        queue.push(packet(3, 3)).unwrap();
        assert_eq!(expect_packet(queue.pop(false)).data[0], 2);
        assert_eq!(expect_packet(queue.pop(false)).data[0], 3);
        assert_eq!(queue.stats(), QueueStats { packets: 0, bytes: 0 });
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let queue = Arc::new(PacketQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || expect_packet(queue.pop(true)).size())
        };

        thread::sleep(Duration::from_millis(50));
        queue.push(packet(9, 33)).unwrap();

        assert_eq!(consumer.join().unwrap(), 33);
    }

    #[test]
    fn concurrent_producers_are_seen_exactly_once() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let queue = Arc::new(PacketQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut seen = vec![0u32; PRODUCERS * PER_PRODUCER];
                let mut last_per_producer = vec![None::<usize>; PRODUCERS];
                for _ in 0..PRODUCERS * PER_PRODUCER {
                    let p = expect_packet(queue.pop(true));
                    let producer = p.stream_index;
                    let seq = u16::from_le_bytes([p.data[0], p.data[1]]) as usize;
                    // 同一个生产者的包保持先后顺序
                    if let Some(last) = last_per_producer[producer] {
                        assert!(seq > last);
                    }
                    last_per_producer[producer] = Some(seq);
                    seen[producer * PER_PRODUCER + seq] += 1;
                }
                seen
            })
        };

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        let bytes = (seq as u16).to_le_bytes();
                        queue
                            .push(MediaPacket::new(producer, bytes.to_vec()))
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in producers {
            handle.join().unwrap();
        }
        let seen = consumer.join().unwrap();
        assert!(seen.iter().all(|&count| count == 1));
        assert!(queue.is_empty());
    }

    #[test]
    fn shutdown_releases_every_blocked_waiter() {
        for waiters in [0usize, 1, 4] {
            let queue = Arc::new(PacketQueue::new());
            let handles: Vec<_> = (0..waiters)
                .map(|_| {
                    let queue = queue.clone();
                    thread::spawn(move || {
                        let started = Instant::now();
                        let result = queue.pop(true);
                        (matches!(result, PopResult::ShutDown), started.elapsed())
                    })
                })
                .collect();

            thread::sleep(Duration::from_millis(50));
            queue.shutdown();

            for handle in handles {
                let (shut_down, waited) = handle.join().unwrap();
                assert!(shut_down);
                assert!(waited < Duration::from_secs(5));
            }
            // 关闭之后再次等待也不会阻塞
            assert!(matches!(queue.pop(true), PopResult::ShutDown));
        }
    }

    #[test]
    fn shutdown_is_idempotent_and_drains() {
        let queue = PacketQueue::new();
        queue.push(packet(1, 10)).unwrap();
        queue.push(packet(2, 20)).unwrap();

        queue.shutdown();
        let after_first = (queue.stats(), queue.is_shut_down());
        queue.shutdown();
        let after_second = (queue.stats(), queue.is_shut_down());

        assert_eq!(after_first, after_second);
        assert_eq!(after_first, (QueueStats::default(), true));
        assert!(matches!(queue.pop(false), PopResult::ShutDown));
    }

    #[test]
    fn push_after_shutdown_hands_packet_back() {
        let queue = PacketQueue::new();
        queue.shutdown();

        let err = queue.push(packet(5, 12)).unwrap_err();
        assert!(matches!(err, PushError::ShutDown(_)));
        assert_eq!(err.into_packet().size(), 12);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn reject_policy_returns_full() {
        let queue = PacketQueue::with_capacity(QueueCapacity {
            max_packets: Some(2),
            max_bytes: None,
            overflow: OverflowPolicy::Reject,
        });
        queue.push(packet(1, 1)).unwrap();
        queue.push(packet(2, 1)).unwrap();

        let err = queue.push(packet(3, 1)).unwrap_err();
        assert!(matches!(err, PushError::Full(_)));
        assert_eq!(queue.len(), 2);

        queue.pop(false);
        queue.push(packet(3, 1)).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn byte_limit_admits_oversized_packet_into_empty_queue() {
        let queue = PacketQueue::with_capacity(QueueCapacity {
            max_packets: None,
            max_bytes: Some(100),
            overflow: OverflowPolicy::Reject,
        });

        queue.push(packet(1, 500)).unwrap();
        assert!(matches!(queue.push(packet(2, 1)), Err(PushError::Full(_))));

        queue.pop(false);
        queue.push(packet(3, 60)).unwrap();
        queue.push(packet(4, 40)).unwrap();
        assert!(matches!(queue.push(packet(5, 1)), Err(PushError::Full(_))));
        assert_eq!(queue.size(), 100);
    }

    #[test]
    fn block_policy_waits_for_consumer() {
        let queue = Arc::new(PacketQueue::with_capacity(QueueCapacity {
            max_packets: Some(1),
            max_bytes: None,
            overflow: OverflowPolicy::Block,
        }));
        queue.push(packet(1, 4)).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(packet(2, 4)).is_ok())
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert_eq!(expect_packet(queue.pop(false)).data[0], 1);

        assert!(producer.join().unwrap());
        assert_eq!(expect_packet(queue.pop(true)).data[0], 2);
    }

    #[test]
    fn blocked_producer_is_released_by_shutdown() {
        let queue = Arc::new(PacketQueue::with_capacity(QueueCapacity {
            max_packets: Some(1),
            max_bytes: None,
            overflow: OverflowPolicy::Block,
        }));
        queue.push(packet(1, 4)).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(packet(2, 4)))
        };

        thread::sleep(Duration::from_millis(50));
        queue.shutdown();

        let err = producer.join().unwrap().unwrap_err();
        assert!(matches!(err, PushError::ShutDown(_)));
    }

    #[test]
    fn pop_timeout_returns_empty_then_packet() {
        let queue = PacketQueue::new();
        let started = Instant::now();
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(30)),
            PopResult::Empty
        ));
        assert!(started.elapsed() >= Duration::from_millis(30));

        queue.push(packet(1, 3)).unwrap();
        let p = expect_packet(queue.pop_timeout(Duration::from_millis(30)));
        assert_eq!(p.size(), 3);
    }

    #[test]
    fn wait_until_drained_tracks_consumer() {
        let queue = Arc::new(PacketQueue::new());
        assert!(queue.wait_until_drained(Duration::from_millis(1)));

        queue.push(packet(1, 3)).unwrap();
        assert!(!queue.wait_until_drained(Duration::from_millis(20)));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                queue.pop(true);
                thread::sleep(Duration::from_millis(30));
                queue.mark_played();
            })
        };
        assert!(queue.wait_until_drained(Duration::from_secs(5)));
        consumer.join().unwrap();
    }

    #[test]
    fn popped_but_unplayed_data_is_not_drained() {
        let queue = PacketQueue::new();
        queue.push(packet(1, 4096)).unwrap();
        expect_packet(queue.pop(false));

        // 队列已空，但消费者手上还有数据
        assert!(queue.is_empty());
        assert!(!queue.wait_until_drained(Duration::from_millis(10)));

        queue.mark_played();
        assert!(queue.wait_until_drained(Duration::from_millis(1)));
    }

    #[test]
    fn shutdown_releases_drain_waiter() {
        let queue = Arc::new(PacketQueue::new());
        queue.push(packet(1, 8)).unwrap();

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.wait_until_drained(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        queue.shutdown();

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn drain_waiter_does_not_steal_producer_wakeup() {
        let queue = Arc::new(PacketQueue::with_capacity(QueueCapacity {
            max_packets: Some(1),
            max_bytes: None,
            overflow: OverflowPolicy::Block,
        }));
        queue.push(packet(1, 4)).unwrap();

        // 先挂起 drain 等待者，再挂起被容量阻塞的生产者
        let drain_waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.wait_until_drained(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(packet(2, 4)).is_ok())
        };
        thread::sleep(Duration::from_millis(50));

        assert_eq!(expect_packet(queue.pop(false)).data[0], 1);
        queue.mark_played();

        // 腾出的位置必须交给生产者，不能被 drain 等待者吞掉
        assert!(producer.join().unwrap());
        assert_eq!(queue.len(), 1);
        assert_eq!(expect_packet(queue.pop(true)).data[0], 2);
        queue.mark_played();
        assert!(drain_waiter.join().unwrap());
    }
}
