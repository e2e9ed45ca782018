//! 执行池
//!
//! 有界的执行槽位 + FIFO 等待队列。槽位占满时任务留在队列里（背压），
//! 不报错也不额外起进程。出队和分配槽位在同一把锁内完成，
//! 保证任意时刻占用槽位的任务数不超过上限。

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use super::error::{JobError, JobResult};
use super::task_slot_pool::TaskSlotPool;

/// 一次准入：任务获得了运行槽位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub job_id: String,
    pub slot_id: usize,
}

#[derive(Debug)]
struct PoolState {
    slots: TaskSlotPool,
    /// 等待队列（job_id，FIFO）
    waiting: VecDeque<String>,
}

/// 执行池
#[derive(Debug)]
pub struct ExecutionPool {
    state: Mutex<PoolState>,
    accepting: AtomicBool,
    /// 槽位全部释放时通知
    idle: Notify,
}

impl ExecutionPool {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                slots: TaskSlotPool::new(max_concurrency.max(1)),
                waiting: VecDeque::new(),
            }),
            accepting: AtomicBool::new(true),
            idle: Notify::new(),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// 加入等待队列末尾
    pub fn enqueue(&self, job_id: &str) -> JobResult<()> {
        let mut state = self.state.lock();
        // 在锁内检查，避免和 close() 交错后漏掉队列里的任务
        if !self.is_accepting() {
            return Err(JobError::ShuttingDown);
        }
        state.waiting.push_back(job_id.to_string());
        debug!("任务 {} 加入等待队列，队列长度: {}", job_id, state.waiting.len());
        Ok(())
    }

    /// 从等待队列移除任务（取消排队任务时使用）
    pub fn remove_queued(&self, job_id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.waiting.len();
        state.waiting.retain(|id| id != job_id);
        state.waiting.len() != before
    }

    /// 取出队首任务并分配槽位；没有空闲槽位或队列为空时返回 None
    pub fn admit_next(&self) -> Option<Admission> {
        let mut state = self.state.lock();
        if !self.is_accepting() || state.waiting.is_empty() {
            return None;
        }
        if state.slots.available_slots() == 0 {
            return None;
        }

        let job_id = state.waiting.pop_front()?;
        let slot_id = state.slots.allocate(&job_id)?;
        Some(Admission { job_id, slot_id })
    }

    /// 释放槽位
    pub fn release(&self, slot_id: usize) {
        let used = {
            let mut state = self.state.lock();
            state.slots.release(slot_id);
            state.slots.used_slots()
        };
        if used == 0 {
            self.idle.notify_waiters();
        }
    }

    pub fn queued_len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    pub fn running_len(&self) -> usize {
        self.state.lock().slots.used_slots()
    }

    pub fn max_concurrency(&self) -> usize {
        self.state.lock().slots.max_slots()
    }

    /// 调整最大并发数（至少为 1）
    pub fn resize(&self, new_max: usize) {
        self.state.lock().slots.resize(new_max.max(1));
    }

    /// 停止接受新任务，返回仍在排队的任务ID
    pub fn close(&self) -> Vec<String> {
        let mut state = self.state.lock();
        self.accepting.store(false, Ordering::SeqCst);
        let drained: Vec<String> = state.waiting.drain(..).collect();
        info!(
            "执行池已关闭: 丢弃排队任务 {} 个，运行中 {} 个",
            drained.len(),
            state.slots.used_slots()
        );
        drained
    }

    /// 等待所有槽位释放，超时返回 false
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // 先注册再检查，避免错过 notify_waiters
            notified.as_mut().enable();

            if self.running_len() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.running_len() == 0;
            }
        }
    }
}
