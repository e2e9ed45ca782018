//! 任务位池
//!
//! 记录每个执行槽位被哪个任务占用，决定任务能否获得运行资格。
//! 本身不加锁，由 [`ExecutionPool`](super::pool::ExecutionPool) 和等待队列放在同一把锁里使用。

use tracing::{debug, info, warn};

/// 任务位
#[derive(Debug, Clone)]
pub struct TaskSlot {
    /// 槽位ID
    pub id: usize,
    /// 占用此位的任务ID
    pub task_id: Option<String>,
}

impl TaskSlot {
    fn new(id: usize) -> Self {
        Self { id, task_id: None }
    }

    pub fn is_free(&self) -> bool {
        self.task_id.is_none()
    }
}

/// 任务位池
#[derive(Debug)]
pub struct TaskSlotPool {
    /// 最大槽位数（支持动态调整）
    max_slots: usize,
    slots: Vec<TaskSlot>,
}

impl TaskSlotPool {
    pub fn new(max_slots: usize) -> Self {
        let slots = (0..max_slots).map(TaskSlot::new).collect();

        info!("创建任务位池，最大槽位数: {}", max_slots);

        Self { max_slots, slots }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// 动态调整槽位池容量
    ///
    /// 缩容不会中断已占用的槽位，超出新上限的任务继续运行到完成，
    /// 新的分配只在新上限范围内进行
    pub fn resize(&mut self, new_max: usize) {
        let old_max = self.max_slots;

        if new_max == old_max {
            debug!("任务位池容量无需调整: {}", old_max);
            return;
        }

        if new_max > old_max {
            // 缩容遗留的槽位可能只剩一部分，按缺失的ID补齐
            for id in 0..new_max {
                if !self.slots.iter().any(|s| s.id == id) {
                    self.slots.push(TaskSlot::new(id));
                }
            }
            self.slots.sort_by_key(|s| s.id);
            info!("任务位池扩容: {} -> {}", old_max, new_max);
        } else {
            let occupied_beyond_limit = self
                .slots
                .iter()
                .filter(|s| s.id >= new_max && !s.is_free())
                .count();

            if occupied_beyond_limit > 0 {
                warn!(
                    "任务位池缩容: {} -> {} (有 {} 个超出新上限的槽位仍被占用，将继续运行)",
                    old_max, new_max, occupied_beyond_limit
                );
            } else {
                self.slots.retain(|s| s.id < new_max);
                info!("任务位池缩容: {} -> {} (已清理空闲槽位)", old_max, new_max);
            }
        }

        self.max_slots = new_max;
    }

    /// 尝试分配任务位，成功返回 slot_id
    pub fn allocate(&mut self, task_id: &str) -> Option<usize> {
        let max_slots = self.max_slots;

        // 只在有效范围内分配（id < max_slots）
        for slot in self.slots.iter_mut() {
            if slot.id < max_slots && slot.is_free() {
                slot.task_id = Some(task_id.to_string());
                debug!("分配任务位: slot_id={}, task_id={}", slot.id, task_id);
                return Some(slot.id);
            }
        }
        None
    }

    /// 释放任务位，返回原占用的任务ID
    pub fn release(&mut self, slot_id: usize) -> Option<String> {
        let slot = self.slots.iter_mut().find(|s| s.id == slot_id)?;
        let task_id = slot.task_id.take();
        if let Some(ref id) = task_id {
            debug!("释放任务位: slot_id={}, task_id={}", slot_id, id);
        }

        // 缩容后遗留的槽位释放后直接移除
        if slot_id >= self.max_slots {
            self.slots.retain(|s| s.id < self.max_slots || !s.is_free());
        }

        task_id
    }

    /// 可用槽位数
    pub fn available_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.id < self.max_slots && s.is_free())
            .count()
    }

    /// 已占用槽位数（包括缩容后仍在运行的槽位）
    pub fn used_slots(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }
}
