/// Types implementing BeanstalkSerialisable can be written to the server
/// over a Beanstalk TCP connection.
pub trait BeanstalkSerialisable {
    /// Converts the value in question to a single wire line, without the
    /// trailing CRLF (the transport appends it on write).
    fn serialise_beanstalk(&self) -> Vec<u8>;
}
