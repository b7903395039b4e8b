//! Per-state event tracks.
//!
//! A track is one byte buffer: `count` fixed-size headers followed by the payload region.
//! Header offsets are relative to the end of the header region, so inserting a header moves the
//! whole payload region without touching any stored offset. Removing an event splices its
//! header and payload out and relocates the offsets of every payload stored after it.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::EventError;
use crate::inputs::{InputType, InputValue};

/// Size in bytes of one encoded [`EventHeader`].
pub const EVENT_HEADER_SIZE: usize = 16;

/// Payload size of a [`SetInputEvent`].
pub const SET_INPUT_PAYLOAD_SIZE: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Write a value into an instance input when playback crosses the event time.
    SetInput,
}

impl EventKind {
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            EventKind::SetInput => 0,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, EventError> {
        match tag {
            0 => Ok(EventKind::SetInput),
            other => Err(EventError::UnknownKind(other)),
        }
    }
}

/// Fixed-size record describing one event.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EventHeader {
    /// Seconds from the start of the state.
    pub time: f32,
    pub kind: EventKind,
    /// Payload length in bytes.
    pub size: u32,
    /// Payload position relative to the end of the header region.
    pub offset: u32,
}

impl EventHeader {
    fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_f32(&mut out[0..4], self.time);
        out[4] = self.kind.tag();
        out[5..8].fill(0);
        LittleEndian::write_u32(&mut out[8..12], self.size);
        LittleEndian::write_u32(&mut out[12..16], self.offset);
    }

    fn decode(raw: &[u8]) -> Result<Self, EventError> {
        if raw.len() < EVENT_HEADER_SIZE {
            return Err(EventError::Corrupt("header truncated".into()));
        }
        Ok(Self {
            time: LittleEndian::read_f32(&raw[0..4]),
            kind: EventKind::from_tag(raw[4])?,
            size: LittleEndian::read_u32(&raw[8..12]),
            offset: LittleEndian::read_u32(&raw[12..16]),
        })
    }
}

/// Payload of [`EventKind::SetInput`]: a declared input index and a 4-byte value cell that is
/// interpreted with the input's declared type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetInputEvent {
    /// Index into the input declaration, `-1` once the input has been removed.
    pub input: i32,
    pub cell: [u8; 4],
}

impl SetInputEvent {
    pub fn new(input: usize, value: InputValue) -> Self {
        Self {
            input: input as i32,
            cell: value.to_cell(),
        }
    }

    pub fn input_index(&self) -> Option<usize> {
        usize::try_from(self.input).ok()
    }

    pub fn value(&self, ty: InputType) -> InputValue {
        InputValue::from_cell(self.cell, ty)
    }

    pub fn encode(&self) -> [u8; SET_INPUT_PAYLOAD_SIZE] {
        let mut out = [0u8; SET_INPUT_PAYLOAD_SIZE];
        LittleEndian::write_i32(&mut out[0..4], self.input);
        out[4..8].copy_from_slice(&self.cell);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EventError> {
        if payload.len() != SET_INPUT_PAYLOAD_SIZE {
            return Err(EventError::Corrupt(format!(
                "set-input payload is {} bytes",
                payload.len()
            )));
        }
        let mut cell = [0u8; 4];
        cell.copy_from_slice(&payload[4..8]);
        Ok(Self {
            input: LittleEndian::read_i32(&payload[0..4]),
            cell,
        })
    }
}

/// Header array plus payload blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventTrack {
    count: u32,
    data: Vec<u8>,
}

impl EventTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt an encoded track after checking every header and payload range.
    pub fn from_raw(count: u32, data: Vec<u8>) -> Result<Self, EventError> {
        let track = Self { count, data };
        track.validate()?;
        Ok(track)
    }

    /// Check that the payload ranges tile the region after the headers exactly: no gaps, no
    /// overlaps, nothing out of bounds.
    pub fn validate(&self) -> Result<(), EventError> {
        let header_end = self.header_end();
        if self.data.len() < header_end {
            return Err(EventError::Corrupt(format!(
                "{} bytes cannot hold {} headers",
                self.data.len(),
                self.count
            )));
        }
        let payload_len = (self.data.len() - header_end) as u64;
        let mut ranges = Vec::with_capacity(self.len());
        for index in 0..self.len() {
            let header = self.read_header(index)?;
            let end = header.offset as u64 + header.size as u64;
            if end > payload_len {
                return Err(EventError::Corrupt(format!(
                    "event {index} payload ends at {end}, region is {payload_len} bytes"
                )));
            }
            if header.kind == EventKind::SetInput
                && header.size as usize != SET_INPUT_PAYLOAD_SIZE
            {
                return Err(EventError::Corrupt(format!(
                    "event {index} set-input payload is {} bytes",
                    header.size
                )));
            }
            ranges.push((header.offset as u64, end, index));
        }
        ranges.sort_unstable();
        let mut cursor = 0u64;
        for (start, end, index) in ranges {
            if start != cursor {
                return Err(EventError::Corrupt(format!(
                    "event {index} payload starts at {start}, expected {cursor}"
                )));
            }
            cursor = end;
        }
        if cursor != payload_len {
            return Err(EventError::Corrupt(format!(
                "payloads cover {cursor} bytes, region is {payload_len} bytes"
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn header_end(&self) -> usize {
        self.len() * EVENT_HEADER_SIZE
    }

    fn read_header(&self, index: usize) -> Result<EventHeader, EventError> {
        if index >= self.len() {
            return Err(EventError::IndexOutOfRange {
                index,
                count: self.len(),
            });
        }
        let start = index * EVENT_HEADER_SIZE;
        EventHeader::decode(&self.data[start..start + EVENT_HEADER_SIZE])
    }

    fn write_header(&mut self, index: usize, header: &EventHeader) {
        let start = index * EVENT_HEADER_SIZE;
        header.encode(&mut self.data[start..start + EVENT_HEADER_SIZE]);
    }

    pub fn header(&self, index: usize) -> Option<EventHeader> {
        self.read_header(index).ok()
    }

    fn payload_range(&self, index: usize) -> Result<std::ops::Range<usize>, EventError> {
        let header = self.read_header(index)?;
        let start = self.header_end() + header.offset as usize;
        Ok(start..start + header.size as usize)
    }

    pub fn payload(&self, index: usize) -> Option<&[u8]> {
        let range = self.payload_range(index).ok()?;
        self.data.get(range)
    }

    pub fn payload_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let range = self.payload_range(index).ok()?;
        self.data.get_mut(range)
    }

    /// Append an event and return its index.
    pub fn add_event(&mut self, kind: EventKind, time: f32, payload: &[u8]) -> usize {
        let header_end = self.header_end();
        let header = EventHeader {
            time,
            kind,
            size: payload.len() as u32,
            offset: (self.data.len() - header_end) as u32,
        };
        let mut raw = [0u8; EVENT_HEADER_SIZE];
        header.encode(&mut raw);
        self.data.splice(header_end..header_end, raw);
        self.data.extend_from_slice(payload);
        self.count += 1;
        self.len() - 1
    }

    pub fn add_set_input(&mut self, time: f32, input: usize, value: InputValue) -> usize {
        let payload = SetInputEvent::new(input, value).encode();
        self.add_event(EventKind::SetInput, time, &payload)
    }

    /// Remove event `index` and return its header. Later events shift down by one index.
    pub fn remove_event(&mut self, index: usize) -> Result<EventHeader, EventError> {
        let removed = self.read_header(index)?;
        let payload = self.payload_range(index)?;
        self.data.drain(payload);
        for other in 0..self.len() {
            if other == index {
                continue;
            }
            let mut header = self.read_header(other)?;
            if header.offset > removed.offset {
                header.offset -= removed.size;
                self.write_header(other, &header);
            }
        }
        let start = index * EVENT_HEADER_SIZE;
        self.data.drain(start..start + EVENT_HEADER_SIZE);
        self.count -= 1;
        Ok(removed)
    }

    pub fn set_time(&mut self, index: usize, time: f32) -> Result<(), EventError> {
        let mut header = self.read_header(index)?;
        header.time = time;
        self.write_header(index, &header);
        Ok(())
    }

    /// Headers with their payloads in index order.
    pub fn iter(&self) -> impl Iterator<Item = (EventHeader, &[u8])> + '_ {
        (0..self.len()).filter_map(move |index| {
            let header = self.header(index)?;
            Some((header, self.payload(index)?))
        })
    }

    /// Set-input events with their times, skipping any other kind.
    pub fn set_inputs(&self) -> impl Iterator<Item = (f32, SetInputEvent)> + '_ {
        self.iter().filter_map(|(header, payload)| match header.kind {
            EventKind::SetInput => SetInputEvent::decode(payload)
                .ok()
                .map(|event| (header.time, event)),
        })
    }

    /// Keep set-input payloads pointing at the same inputs after input `removed` is deleted.
    pub(crate) fn on_input_removed(&mut self, removed: usize) {
        for index in 0..self.len() {
            let Some(header) = self.header(index) else {
                continue;
            };
            if header.kind != EventKind::SetInput {
                continue;
            }
            let Some(payload) = self.payload_mut(index) else {
                continue;
            };
            let Ok(mut event) = SetInputEvent::decode(payload) else {
                continue;
            };
            match event.input_index() {
                Some(i) if i == removed => event.input = -1,
                Some(i) if i > removed => event.input -= 1,
                _ => continue,
            }
            payload.copy_from_slice(&event.encode());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrity(track: &EventTrack) {
        let sizes: usize = track.iter().map(|(h, _)| h.size as usize).sum();
        assert_eq!(track.byte_len(), track.len() * EVENT_HEADER_SIZE + sizes);
        track.validate().unwrap();
    }

    #[test]
    fn add_then_remove_restores_byte_length() {
        let mut track = EventTrack::new();
        track.add_set_input(0.25, 0, InputValue::Bool(true));
        let before = track.byte_len();

        let index = track.add_set_input(1.0, 1, InputValue::Float(3.0));
        assert_eq!(track.byte_len(), before + EVENT_HEADER_SIZE + SET_INPUT_PAYLOAD_SIZE);
        integrity(&track);

        let removed = track.remove_event(index).unwrap();
        assert_eq!(removed.time, 1.0);
        assert_eq!(track.byte_len(), before);
        integrity(&track);
    }

    #[test]
    fn removing_a_middle_event_relocates_later_payloads() {
        let mut track = EventTrack::new();
        track.add_event(
            EventKind::SetInput,
            0.1,
            &SetInputEvent::new(0, InputValue::Int(1)).encode(),
        );
        track.add_event(
            EventKind::SetInput,
            0.2,
            &SetInputEvent::new(1, InputValue::Int(2)).encode(),
        );
        track.add_event(
            EventKind::SetInput,
            0.3,
            &SetInputEvent::new(2, InputValue::Int(3)).encode(),
        );

        track.remove_event(1).unwrap();
        integrity(&track);
        let events: Vec<_> = track.set_inputs().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1.input, 0);
        assert_eq!(events[1].0, 0.3);
        assert_eq!(events[1].1.input, 2);
        assert_eq!(events[1].1.value(InputType::Int), InputValue::Int(3));
    }

    #[test]
    fn remove_out_of_range_is_an_error() {
        let mut track = EventTrack::new();
        assert_eq!(
            track.remove_event(0),
            Err(EventError::IndexOutOfRange { index: 0, count: 0 })
        );
    }

    #[test]
    fn from_raw_rejects_inconsistent_tracks() {
        let mut track = EventTrack::new();
        track.add_set_input(0.5, 0, InputValue::Float(1.0));
        let bytes = track.as_bytes().to_vec();

        assert!(EventTrack::from_raw(1, bytes.clone()).is_ok());
        assert!(EventTrack::from_raw(2, bytes.clone()).is_err());
        let mut short = bytes.clone();
        short.pop();
        assert!(EventTrack::from_raw(1, short).is_err());
        let mut bad_kind = bytes;
        bad_kind[4] = 9;
        assert_eq!(
            EventTrack::from_raw(1, bad_kind),
            Err(EventError::UnknownKind(9))
        );
    }

    #[test]
    fn from_raw_rejects_overlapping_payloads() {
        let mut track = EventTrack::new();
        track.add_set_input(0.1, 0, InputValue::Int(1));
        track.add_set_input(0.2, 1, InputValue::Int(2));
        let mut bytes = track.as_bytes().to_vec();
        assert!(EventTrack::from_raw(2, bytes.clone()).is_ok());

        // second header's offset now aliases the first payload
        let offset = EVENT_HEADER_SIZE + 12;
        LittleEndian::write_u32(&mut bytes[offset..offset + 4], 0);
        assert!(matches!(
            EventTrack::from_raw(2, bytes),
            Err(EventError::Corrupt(_))
        ));
    }

    #[test]
    fn input_removal_remaps_set_input_indices() {
        let mut track = EventTrack::new();
        track.add_set_input(0.0, 0, InputValue::Int(1));
        track.add_set_input(0.0, 1, InputValue::Int(2));
        track.add_set_input(0.0, 2, InputValue::Int(3));
        track.on_input_removed(1);
        let inputs: Vec<i32> = track.set_inputs().map(|(_, e)| e.input).collect();
        assert_eq!(inputs, vec![0, -1, 1]);
    }
}
