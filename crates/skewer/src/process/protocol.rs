use std::io::{BufRead, Write};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::error::Result;

/// Identifies one request on a cross-process queue.
///
/// `Die` is the shutdown sentinel. It is a separate variant, so no real task
/// id can collide with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskId {
    Task(u64),
    Die,
}

impl TaskId {
    pub fn is_die(&self) -> bool {
        matches!(self, TaskId::Die)
    }
}

/// Inbound message: one unbatched item, or the sentinel with no item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<I> {
    pub task_id: TaskId,
    pub item: Option<I>,
}

impl<I> Request<I> {
    pub fn task(id: u64, item: I) -> Self {
        Self { task_id: TaskId::Task(id), item: Some(item) }
    }

    pub fn die() -> Self {
        Self { task_id: TaskId::Die, item: None }
    }
}

/// Outbound message. `output` is `None` for the sentinel echo and for items
/// the predictor failed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<O> {
    pub task_id: TaskId,
    pub output: Option<O>,
}

impl<O> Response<O> {
    pub fn die() -> Self {
        Self { task_id: TaskId::Die, output: None }
    }
}

/// Writes one message as a single JSON line and flushes it.
pub fn write_message<W, M>(writer: &mut W, message: &M) -> Result<()>
where
    W: Write,
    M: Serialize,
{
    serde_json::to_writer(&mut *writer, message)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Reads the next JSON line. `Ok(None)` means the peer closed the stream.
pub fn read_message<R, M>(reader: &mut R) -> Result<Option<M>>
where
    R: BufRead,
    M: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
        line.clear();
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::error::SkewerError;

    #[test]
    fn test_wire_format() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Request::task(7, vec![1, 2])).unwrap();
        write_message(&mut buf, &Request::<Vec<i32>>::die()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "{\"task_id\":{\"task\":7},\"item\":[1,2]}\n{\"task_id\":\"die\",\"item\":null}\n"
        );
    }

    #[test]
    fn test_read_skips_blank_lines_and_detects_eof() {
        let mut reader = Cursor::new("\n{\"task_id\":{\"task\":1},\"output\":3}\n");
        let response: Response<i32> = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(response, Response { task_id: TaskId::Task(1), output: Some(3) });
        assert!(read_message::<_, Response<i32>>(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let mut reader = Cursor::new("not json\n");
        let result = read_message::<_, Request<i32>>(&mut reader);
        assert!(matches!(result, Err(SkewerError::Serialization(_))));
    }

    #[test]
    fn test_sentinel_is_distinct_from_any_task() {
        assert!(TaskId::Die.is_die());
        assert!(!TaskId::Task(u64::MAX).is_die());
        assert_ne!(TaskId::Task(0), TaskId::Die);
    }
}
