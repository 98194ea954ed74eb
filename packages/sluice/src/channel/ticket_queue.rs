// FIFO queue of pending registrations with O(1) removal from the middle.
//
// a doubly linked list threaded through a slab of slots. pushing an entry returns a ticket naming
// its slot; the ticket stays valid until the entry leaves the queue by any route, after which the
// slot's generation moves on and the ticket goes stale. slots are recycled, so a stale ticket may
// name a slot that has since been reused, which the generation check catches.

use std::fmt;


// handle to an entry in a TicketQueue.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct Ticket {
    idx: u32,
    generation: u32,
}

pub(crate) struct TicketQueue<E> {
    slots: Vec<Slot<E>>,
    // indices of slots with no entry.
    free: Vec<u32>,
    // front and back of queue, unless queue is empty.
    front_back: Option<(u32, u32)>,
    len: usize,
}

struct Slot<E> {
    generation: u32,
    entry: Option<E>,
    // next slot towards back.
    to_back: Option<u32>,
    // next slot towards front.
    to_front: Option<u32>,
}

impl<E> TicketQueue<E> {
    pub(crate) fn new() -> Self {
        TicketQueue {
            slots: Vec::new(),
            free: Vec::new(),
            front_back: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    // link an entry to the back of the queue.
    pub(crate) fn push(&mut self, entry: E) -> Ticket {
        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                let idx = u32::try_from(self.slots.len())
                    .expect("ticket queue exceeded u32::MAX entries");
                self.slots.push(Slot { generation: 0, entry: None, to_back: None, to_front: None });
                idx
            }
        };

        let to_front = self.front_back.map(|(_, back)| back);
        {
            let slot = &mut self.slots[idx as usize];
            debug_assert!(slot.entry.is_none());
            slot.entry = Some(entry);
            slot.to_front = to_front;
            slot.to_back = None;
        }
        match &mut self.front_back {
            Some((_, back)) => {
                self.slots[*back as usize].to_back = Some(idx);
                *back = idx;
            }
            // edge case: entry becomes only entry in queue
            None => self.front_back = Some((idx, idx)),
        }
        self.len += 1;

        Ticket { idx, generation: self.slots[idx as usize].generation }
    }

    pub(crate) fn front(&self) -> Option<&E> {
        self.front_back.and_then(|(front, _)| self.slots[front as usize].entry.as_ref())
    }

    pub(crate) fn pop_front(&mut self) -> Option<E> {
        let (front, _) = self.front_back?;
        Some(self.unlink(front))
    }

    // remove the entry the ticket names, which must still be in the queue.
    pub(crate) fn remove(&mut self, ticket: Ticket) -> E {
        self.try_remove(ticket)
            .expect("invariant violation: ticket used after its entry left the queue")
    }

    // remove the entry the ticket names, unless it already left the queue.
    pub(crate) fn try_remove(&mut self, ticket: Ticket) -> Option<E> {
        let slot = self.slots.get(ticket.idx as usize)?;
        if slot.generation != ticket.generation || slot.entry.is_none() {
            return None;
        }
        Some(self.unlink(ticket.idx))
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, ticket: Ticket) -> bool {
        self.slots.get(ticket.idx as usize)
            .is_some_and(|slot| slot.generation == ticket.generation && slot.entry.is_some())
    }

    // front-to-back iteration.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        let mut next = self.front_back.map(|(front, _)| front);
        std::iter::from_fn(move || {
            let slot = &self.slots[next? as usize];
            next = slot.to_back;
            slot.entry.as_ref()
        })
    }

    // remove everything, front to back.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = E> + '_ {
        std::iter::from_fn(move || self.pop_front())
    }

    fn unlink(&mut self, idx: u32) -> E {
        let (to_front, to_back, entry) = {
            let slot = &mut self.slots[idx as usize];
            let entry = slot.entry.take().expect("invariant violation: unlinking an empty slot");
            slot.generation = slot.generation.wrapping_add(1);
            (slot.to_front.take(), slot.to_back.take(), entry)
        };

        match to_front {
            Some(to_front) => self.slots[to_front as usize].to_back = to_back,
            // edge case: entry was at the front of queue
            None => if let Some((front, _)) = &mut self.front_back {
                *front = to_back.unwrap_or(*front);
            },
        }
        match to_back {
            Some(to_back) => self.slots[to_back as usize].to_front = to_front,
            // edge case: entry was at the back of queue
            None => if let Some((_, back)) = &mut self.front_back {
                *back = to_front.unwrap_or(*back);
            },
        }
        if to_front.is_none() && to_back.is_none() {
            // edge case: entry was the only entry in queue
            self.front_back = None;
        }

        self.free.push(idx);
        self.len -= 1;
        entry
    }
}

impl<E> Default for TicketQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Debug> fmt::Debug for TicketQueue<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::collections::VecDeque;

    fn contents(queue: &TicketQueue<u32>) -> Vec<u32> {
        queue.iter().copied().collect()
    }

    #[test]
    fn fifo_with_middle_removal() {
        let mut queue = TicketQueue::new();
        let tickets: Vec<Ticket> = (0..5).map(|i| queue.push(i)).collect();
        assert_eq!(queue.remove(tickets[2]), 2);
        assert_eq!(queue.remove(tickets[0]), 0);
        assert_eq!(queue.remove(tickets[4]), 4);
        assert_eq!(contents(&queue), vec![1, 3]);
        assert_eq!(queue.pop_front(), Some(1));
        assert_eq!(queue.front(), Some(&3));
        assert_eq!(queue.pop_front(), Some(3));
        assert_eq!(queue.pop_front(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn stale_ticket_is_detected_after_slot_reuse() {
        let mut queue = TicketQueue::new();
        let old = queue.push(1);
        assert_eq!(queue.pop_front(), Some(1));
        let new = queue.push(2);
        // same slot, new generation
        assert!(!queue.contains(old));
        assert!(queue.contains(new));
        assert_eq!(queue.try_remove(old), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    #[should_panic(expected = "invariant violation")]
    fn strict_remove_of_stale_ticket_panics() {
        let mut queue = TicketQueue::new();
        let ticket = queue.push(1);
        queue.remove(ticket);
        queue.remove(ticket);
    }

    #[test]
    fn drain_empties_and_stales_tickets() {
        let mut queue = TicketQueue::new();
        let tickets: Vec<Ticket> = (0..4).map(|i| queue.push(i)).collect();
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
        assert!(tickets.iter().all(|&ticket| !queue.contains(ticket)));
        queue.push(4);
        assert_eq!(contents(&queue), vec![4]);
    }

    // random pushes, pops and removals checked against a VecDeque.
    #[test]
    fn equivalence_with_vec_deque() {
        let mut rng = Pcg32::from_seed(0xdeadbeefdeadbeefdeadbeefdeadbeefu128.to_le_bytes());
        let mut model: VecDeque<(u32, Ticket)> = VecDeque::new();
        let mut queue = TicketQueue::new();
        for i in 0u32..10_000 {
            match rng.gen_range(0..10) {
                0..=4 => {
                    let ticket = queue.push(i);
                    model.push_back((i, ticket));
                }
                5..=7 => assert_eq!(queue.pop_front(), model.pop_front().map(|(i, _)| i)),
                _ if !model.is_empty() => {
                    let (i, ticket) = model.remove(rng.gen_range(0..model.len())).unwrap();
                    assert_eq!(queue.remove(ticket), i);
                }
                _ => (),
            }
            assert_eq!(queue.len(), model.len());
            assert_eq!(queue.front(), model.front().map(|(i, _)| i));
        }
        assert_eq!(contents(&queue), model.iter().map(|(i, _)| *i).collect::<Vec<_>>());
    }
}
